use proptest::strategy::Strategy;

/// A strategy for node identifiers as they appear in channel-graph dumps:
/// non-empty, ASCII-alphanumeric, and short enough to keep failure output
/// readable.
pub fn any_node_id() -> impl Strategy<Value = String> {
    "[a-z0-9]{1,8}"
}

/// A strategy for short channel id strings in the `<block>x<tx>x<out>`
/// format used by `listchannels` dumps.
pub fn any_scid_string() -> impl Strategy<Value = String> {
    ("0|[1-9][0-9]{0,6}", "0|[1-9][0-9]{0,3}", "0|[1-9]")
        .prop_map(|(block, tx, out)| format!("{block}x{tx}x{out}"))
}
