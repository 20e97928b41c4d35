use std::fmt::Debug;

use proptest::{
    arbitrary::{any, Arbitrary},
    prop_assert_eq, proptest,
    strategy::Strategy,
};
use serde::{de::DeserializeOwned, Serialize};

/// Quickly create a JSON string roundtrip proptest.
///
/// ```ignore
/// json_string_roundtrip_proptest::<Amount>();
/// ```
pub fn json_string_roundtrip_proptest<T>()
where
    T: Arbitrary + Debug + PartialEq + Serialize + DeserializeOwned,
{
    json_string_custom(any::<T>());
}

/// Create a JSON string roundtrip proptest using a custom strategy. Useful
/// for testing foreign types for which we cannot implement [`Arbitrary`].
pub fn json_string_custom<S, T>(strategy: S)
where
    S: Strategy<Value = T>,
    T: Debug + PartialEq + Serialize + DeserializeOwned,
{
    proptest!(|(value1 in strategy)| {
        let json1 = serde_json::to_string(&value1).unwrap();
        let value2 = serde_json::from_str::<T>(&json1).unwrap();
        let json2 = serde_json::to_string(&value2).unwrap();
        prop_assert_eq!(&value1, &value2);
        // Serialized form should be canonical too
        prop_assert_eq!(&json1, &json2);
    });
}
