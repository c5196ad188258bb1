//! Value objects and the zero-value merge contract.
//!
//! Change payloads carry every field as `Option<T>`: `None` means "no change
//! requested". On top of that, field-changed events follow a **non-zero wins**
//! rule: a present value only overwrites state when it is not the zero value of
//! its type. An update therefore cannot reset a field to empty; that would need
//! a dedicated event kind.

use std::collections::{BTreeMap, HashMap};

/// Value objects are immutable, compared by value, and know their zero value.
///
/// ## Usage Pattern
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct Netdev { hwaddr: String, ip: String }
///
/// impl ValueObject for Netdev {
///     fn is_zero(&self) -> bool {
///         self.hwaddr.is_empty() && self.ip.is_empty()
///     }
/// }
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {
    /// `true` when this is the zero ("empty") value of its type.
    fn is_zero(&self) -> bool;
}

impl ValueObject for String {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl ValueObject for bool {
    fn is_zero(&self) -> bool {
        !*self
    }
}

macro_rules! impl_numeric_value_object {
    ($($t:ty),*) => {
        $(
            impl ValueObject for $t {
                fn is_zero(&self) -> bool {
                    *self == 0
                }
            }
        )*
    };
}

impl_numeric_value_object!(u16, u32, u64, i32, i64);

impl<T: ValueObject> ValueObject for Vec<T> {
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V> ValueObject for BTreeMap<K, V>
where
    K: Clone + Ord + core::fmt::Debug,
    V: ValueObject,
{
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V> ValueObject for HashMap<K, V>
where
    K: Clone + Eq + core::hash::Hash + core::fmt::Debug,
    V: ValueObject,
{
    fn is_zero(&self) -> bool {
        self.is_empty()
    }
}

/// "Created" rule: a present value is taken as-is.
pub fn assign<T: ValueObject>(target: &mut T, incoming: &Option<T>) {
    if let Some(value) = incoming {
        *target = value.clone();
    }
}

/// "Field changed" rule: a present, non-zero value overwrites the target.
pub fn merge_non_zero<T: ValueObject>(target: &mut T, incoming: &Option<T>) {
    if let Some(value) = incoming {
        if !value.is_zero() {
            *target = value.clone();
        }
    }
}

/// Same as [`merge_non_zero`] for state fields held as `Option<T>`.
pub fn merge_non_zero_some<T: ValueObject>(target: &mut Option<T>, incoming: &Option<T>) {
    if let Some(value) = incoming {
        if !value.is_zero() {
            *target = Some(value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn assign_takes_present_values_even_when_zero() {
        let mut arch = String::new();
        assign(&mut arch, &Some("x86_64".to_string()));
        assert_eq!(arch, "x86_64");

        let mut size = 10u64;
        assign(&mut size, &Some(0));
        assert_eq!(size, 0);

        assign(&mut size, &None);
        assert_eq!(size, 0);
    }

    #[test]
    fn merge_ignores_absent_and_zero_values() {
        let mut path = "/srv/images/base".to_string();
        merge_non_zero(&mut path, &None);
        merge_non_zero(&mut path, &Some(String::new()));
        assert_eq!(path, "/srv/images/base");

        merge_non_zero(&mut path, &Some("/srv/images/next".to_string()));
        assert_eq!(path, "/srv/images/next");
    }

    #[test]
    fn merge_some_wraps_the_incoming_value() {
        let mut devices: Option<BTreeMap<String, String>> = None;
        merge_non_zero_some(&mut devices, &Some(BTreeMap::new()));
        assert_eq!(devices, None);

        let mut incoming = BTreeMap::new();
        incoming.insert("10.0.0.0/16".to_string(), "eth0".to_string());
        merge_non_zero_some(&mut devices, &Some(incoming.clone()));
        assert_eq!(devices, Some(incoming));
    }

    proptest! {
        /// Property: merge never changes a field unless the incoming value is present and non-zero.
        #[test]
        fn merge_is_non_zero_wins(current in any::<u64>(), incoming in proptest::option::of(any::<u64>())) {
            let mut field = current;
            merge_non_zero(&mut field, &incoming);
            match incoming {
                Some(v) if v != 0 => prop_assert_eq!(field, v),
                _ => prop_assert_eq!(field, current),
            }
        }
    }
}
