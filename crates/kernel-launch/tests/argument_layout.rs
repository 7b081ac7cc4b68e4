use half::{bf16, f16};
use kernel_launch::{marshal, ParamKind, ScalarArg, ScalarKind};
use proptest::prelude::*;

fn arb_scalar() -> impl Strategy<Value = ScalarArg> {
    prop_oneof![
        any::<bool>().prop_map(ScalarArg::bool),
        any::<i8>().prop_map(ScalarArg::i8),
        any::<i16>().prop_map(ScalarArg::i16),
        any::<i32>().prop_map(ScalarArg::i32),
        any::<i64>().prop_map(ScalarArg::i64),
        any::<u8>().prop_map(ScalarArg::u8),
        any::<u16>().prop_map(ScalarArg::u16),
        any::<u32>().prop_map(ScalarArg::u32),
        any::<u64>().prop_map(ScalarArg::u64),
        any::<u16>().prop_map(|bits| ScalarArg::f16(f16::from_bits(bits))),
        any::<u16>().prop_map(|bits| ScalarArg::bf16(bf16::from_bits(bits))),
        any::<f32>().prop_map(ScalarArg::f32),
        any::<f64>().prop_map(ScalarArg::f64),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn marshal_is_deterministic(
        ptrs in prop::collection::vec(any::<u64>(), 0..6),
        dims in prop::collection::vec(any::<i32>(), 0..6),
        scalars in prop::collection::vec(arb_scalar(), 0..8),
    ) {
        let first = marshal(&ptrs, &dims, &scalars).unwrap();
        let second = marshal(&ptrs, &dims, &scalars).unwrap();
        prop_assert_eq!(first.as_bytes(), second.as_bytes());
        prop_assert_eq!(first.sizes(), second.sizes());
    }

    #[test]
    fn marshal_preserves_order_width_and_alignment(
        ptrs in prop::collection::vec(any::<u64>(), 0..6),
        dims in prop::collection::vec(any::<i32>(), 0..6),
        scalars in prop::collection::vec(arb_scalar(), 0..8),
    ) {
        let args = marshal(&ptrs, &dims, &scalars).unwrap();
        prop_assert_eq!(args.len(), ptrs.len() + dims.len() + scalars.len());

        let mut expected_kinds = vec![ParamKind::Pointer; ptrs.len()];
        expected_kinds.extend(dims.iter().map(|_| ParamKind::Scalar(ScalarKind::I32)));
        expected_kinds.extend(scalars.iter().map(|s| ParamKind::Scalar(s.kind())));
        prop_assert_eq!(args.kinds(), expected_kinds.as_slice());

        let mut prev_end = 0usize;
        for (idx, (&offset, &size)) in args.offsets().iter().zip(args.sizes()).enumerate() {
            prop_assert_eq!(size, expected_kinds[idx].width());
            prop_assert_eq!(offset % size, 0);
            prop_assert!(offset >= prev_end);
            prop_assert!(offset - prev_end < size);
            prev_end = offset + size;
        }
        prop_assert_eq!(args.byte_len(), prev_end);

        for (idx, ptr) in ptrs.iter().enumerate() {
            prop_assert_eq!(args.param(idx).unwrap(), &ptr.to_ne_bytes()[..]);
        }
        for (idx, dim) in dims.iter().enumerate() {
            prop_assert_eq!(args.param(ptrs.len() + idx).unwrap(), &dim.to_ne_bytes()[..]);
        }
    }
}

#[test]
fn pointer_dim_float_layout_has_no_padding() {
    let args = marshal(&[0xDEAD_BEEF_0000_0001], &[128], &[ScalarArg::f32(2.5)]).unwrap();
    assert_eq!(args.offsets(), &[0, 8, 12]);
    assert_eq!(args.sizes(), &[8, 4, 4]);
    assert_eq!(args.byte_len(), 16);
}

#[test]
fn i64_after_odd_dim_count_gets_padded() {
    let args = marshal(&[7], &[1, 2, 3], &[ScalarArg::i64(-1), ScalarArg::f16(f16::ONE)]).unwrap();
    assert_eq!(args.offsets(), &[0, 8, 12, 16, 24, 32]);
    assert_eq!(args.sizes(), &[8, 4, 4, 4, 8, 2]);
    assert_eq!(args.byte_len(), 34);
    assert_eq!(&args.as_bytes()[20..24], &[0u8; 4]);
    assert_eq!(args.param(4).unwrap(), &(-1i64).to_ne_bytes());
    assert_eq!(args.param(5).unwrap(), &f16::ONE.to_bits().to_ne_bytes());
}

#[test]
fn declared_kind_is_preserved_not_coerced() {
    let as_float = marshal(&[], &[], &[ScalarArg::f32(1.0)]).unwrap();
    let as_int = marshal(&[], &[], &[ScalarArg::i32(1)]).unwrap();
    assert_eq!(as_float.sizes(), as_int.sizes());
    assert_ne!(as_float.as_bytes(), as_int.as_bytes());
    assert_eq!(as_float.kinds(), &[ParamKind::Scalar(ScalarKind::F32)]);

    let raw = marshal(&[], &[], &[ScalarArg::from_bits(ScalarKind::F32, 1)]).unwrap();
    assert_eq!(raw.as_bytes(), as_int.as_bytes());
}
