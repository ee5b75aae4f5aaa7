use proptest::prelude::*;

use crate::*;

proptest! {
    #[test]
    fn round_trip_preserves_shape(host in HostShape::valid_generator()) {
        let canonical = canonicalize(&host).unwrap();
        let back = to_host(&canonical);

        prop_assert_eq!(&back.sizes, &host.sizes);
        prop_assert_eq!(&back.dynamic, &host.dynamic);
        if host.dtype.round_trips() {
            prop_assert_eq!(back.dtype, host.dtype);
        } else {
            prop_assert_eq!(back.dtype, HostDType::Int64);
        }
    }

    #[test]
    fn flags_present_iff_any_dynamic(host in HostShape::valid_generator()) {
        let canonical = canonicalize(&host).unwrap();
        let any_dynamic = host.dynamic.iter().any(|&d| d);

        prop_assert_eq!(canonical.dynamic().is_some(), any_dynamic);
        if let Some(flags) = canonical.dynamic() {
            prop_assert_eq!(flags.len(), canonical.rank());
        }
    }

    #[test]
    fn unsupported_host_dtypes_fail(dtype in HostDType::unsupported_generator(), sizes in prop::collection::vec(0i64..8, 0..4)) {
        let is_unsupported = matches!(
            canonicalize(&HostShape::new(dtype, sizes)),
            Err(Error::UnsupportedDtype { .. })
        );
        prop_assert!(is_unsupported);
    }
}
