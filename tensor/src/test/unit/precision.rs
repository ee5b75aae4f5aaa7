use test_case::test_case;

use crate::test::{DEVICE, ctx, f32s};
use crate::{Context, Precision, RuntimeConfig};

const X: f32 = 1.003_906_25;

#[test_case(Precision::Default, 1.0 ; "default keeps one bf16 pass")]
#[test_case(Precision::High, 1.007_812_5 ; "high adds the residual pass")]
#[test_case(Precision::Highest, 1.007_827_758_789_062_5 ; "highest is exact")]
fn test_dot_follows_precision(mode: Precision, expected: f32) {
    let ctx = ctx();
    ctx.set_precision(mode);
    let v = f32s(&ctx, &[1], &[X]);
    let result = v.dot(&v).unwrap().to_vec::<f32>().unwrap();
    assert_eq!(result, vec![expected]);
}

#[test]
fn test_precision_is_part_of_fingerprint() {
    let ctx = ctx();
    let run = |ctx: &std::sync::Arc<Context>| {
        let v = f32s(ctx, &[1], &[X]);
        v.dot(&v).unwrap().to_vec::<f32>().unwrap()
    };

    assert_eq!(run(&ctx), vec![1.0]);
    let previous = ctx.set_precision(Precision::Highest);
    assert_eq!(previous, Precision::Default);
    assert_eq!(run(&ctx), vec![1.007_827_758_789_062_5]);
    assert_eq!(ctx.cache().len(), 2);

    ctx.set_precision(Precision::Default);
    assert_eq!(run(&ctx), vec![1.0]);
    assert_eq!(ctx.cache().stats().hits, 1);
}

#[test]
fn test_config_precision_applies_at_startup() {
    let ctx = Context::builder().config(RuntimeConfig::builder().precision(Precision::Highest).build()).build();
    assert_eq!(ctx.precision(), Precision::Highest);

    ctx.set_config(RuntimeConfig::default());
    assert_eq!(ctx.precision(), Precision::Default);
}

#[test]
fn test_elementwise_ignores_precision() {
    let ctx = ctx();
    ctx.set_precision(Precision::Default);
    let v = f32s(&ctx, &[1], &[X]);
    assert_eq!((&v * &v).to_vec::<f32>().unwrap(), vec![1.007_827_758_789_062_5]);
    assert_eq!(ctx.pending_count(DEVICE), 0);
}
