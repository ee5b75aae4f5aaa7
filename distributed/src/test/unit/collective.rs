use std::thread;
use std::time::Duration;

use tardy_device::{Buffer, Failure};
use tardy_dtype::{CanonicalShape, DType, DeviceSpec};
use tardy_ir::ReduceOp;

use crate::test::{ready, values};
use crate::{CollectiveGroup, Error};

/// Run `f` on every participant of a fresh group, one thread each.
fn on_ranks<T: Send>(size: usize, f: impl Fn(&crate::Participant) -> T + Sync) -> Vec<T> {
    let participants = CollectiveGroup::with_size(size).participants();
    let f = &f;
    thread::scope(|scope| {
        let handles: Vec<_> = participants.iter().map(|p| scope.spawn(move || f(p))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

#[test]
fn test_all_gather_ranks() {
    let results = on_ranks(8, |p| {
        let gathered = p.all_gather(&ready(p.rank(), &[], &[p.rank() as f32])).unwrap();
        assert_eq!(gathered.shape().dims(), &[8]);
        assert_eq!(gathered.device(), DeviceSpec::tpu(p.rank()));
        values(&gathered)
    });

    let expected: Vec<f32> = (0..8).map(|r| r as f32).collect();
    for result in results {
        assert_eq!(result, expected);
    }
}

#[test]
fn test_all_gather_concatenates_axis_zero() {
    let results = on_ranks(3, |p| {
        let base = p.rank() as f32 * 10.0;
        values(&p.all_gather(&ready(p.rank(), &[1, 2], &[base, base + 1.0])).unwrap())
    });
    for result in results {
        assert_eq!(result, vec![0.0, 1.0, 10.0, 11.0, 20.0, 21.0]);
    }
}

#[test]
fn test_broadcast() {
    let results = on_ranks(4, |p| values(&p.broadcast(2, &ready(p.rank(), &[2], &[p.rank() as f32, -1.0])).unwrap()));
    for result in results {
        assert_eq!(result, vec![2.0, -1.0]);
    }
}

#[test]
fn test_all_reduce() {
    let sums = on_ranks(4, |p| values(&p.all_reduce(ReduceOp::Sum, &ready(p.rank(), &[2], &[1.0, p.rank() as f32])).unwrap()));
    assert!(sums.iter().all(|s| s == &vec![4.0, 6.0]));

    let maxes = on_ranks(3, |p| values(&p.all_reduce(ReduceOp::Max, &ready(p.rank(), &[], &[p.rank() as f32])).unwrap()));
    assert!(maxes.iter().all(|m| m == &vec![2.0]));
}

#[test]
fn test_ring_permute() {
    let n = 4;
    let mut pairs: Vec<(usize, usize)> = (1..n).map(|i| (i - 1, i)).collect();
    pairs.push((n - 1, 0));

    let results = on_ranks(n, |p| values(&p.collective_permute(&pairs, &ready(p.rank(), &[], &[p.rank() as f32])).unwrap()));
    for (rank, result) in results.into_iter().enumerate() {
        let expected = if rank == 0 { n - 1 } else { rank - 1 };
        assert_eq!(result, vec![expected as f32]);
    }
}

#[test]
fn test_permute_without_sender_gives_zeros() {
    let results = on_ranks(3, |p| values(&p.collective_permute(&[(0, 1)], &ready(p.rank(), &[2], &[5.0, 5.0])).unwrap()));
    assert_eq!(results, vec![vec![0.0, 0.0], vec![5.0, 5.0], vec![0.0, 0.0]]);
}

#[test]
fn test_invalid_permutation() {
    let participants = CollectiveGroup::with_size(2).participants();
    let buffer = ready(0, &[], &[1.0]);
    let err = participants[0].collective_permute(&[(0, 1), (1, 1)], &buffer).unwrap_err();
    assert!(matches!(err, Error::InvalidPermutation { .. }), "{err}");
    let err = participants[0].collective_permute(&[(0, 5)], &buffer).unwrap_err();
    assert!(matches!(err, Error::InvalidPermutation { .. }), "{err}");
}

#[test]
fn test_consecutive_rounds() {
    let results = on_ranks(4, |p| {
        let mut last = Vec::new();
        for step in 0..5 {
            let buffer = ready(p.rank(), &[], &[(p.rank() + step) as f32]);
            last = values(&p.all_reduce(ReduceOp::Sum, &buffer).unwrap());
        }
        last
    });
    // 0+1+2+3 + 4*4
    assert!(results.iter().all(|r| r == &vec![22.0]));
}

#[test]
fn test_shape_mismatch_poisons_group() {
    let group = CollectiveGroup::with_size(2);
    let participants = group.participants();

    let results = thread::scope(|scope| {
        let a = scope.spawn(|| participants[0].all_gather(&ready(0, &[2], &[1.0, 2.0])));
        let b = scope.spawn(|| participants[1].all_gather(&ready(1, &[3], &[1.0, 2.0, 3.0])));
        [a.join().unwrap(), b.join().unwrap()]
    });
    for result in &results {
        assert!(matches!(result, Err(Error::CollectiveMismatch { .. })), "{result:?}");
    }
    assert!(group.is_poisoned());

    let later = participants[0].broadcast(0, &ready(0, &[], &[1.0])).unwrap_err();
    assert!(matches!(later, Error::CollectiveMismatch { .. }));
}

#[test]
fn test_operation_mismatch_message() {
    let participants = CollectiveGroup::with_size(2).participants();
    let results = thread::scope(|scope| {
        let a = scope.spawn(|| participants[0].all_gather(&ready(0, &[], &[1.0])));
        let b = scope.spawn(|| participants[1].broadcast(0, &ready(1, &[], &[1.0])));
        [a.join().unwrap(), b.join().unwrap()]
    });
    let message = results.iter().find_map(|r| r.as_ref().err()).unwrap().to_string();
    assert!(message.starts_with("collective mismatch at rank"), "{message}");
    assert!(message.contains("all_gather(f32[])") && message.contains("broadcast(f32[], source=0)"), "{message}");
}

#[test]
fn test_deadline_poisons_group() {
    let group = CollectiveGroup::builder().size(2).timeout(Duration::from_millis(50)).build();
    let participants = group.participants();

    let err = participants[0].all_gather(&ready(0, &[], &[1.0])).unwrap_err();
    assert!(matches!(err, Error::CollectiveTimeout { waited_ms: 50, .. }), "{err}");
    assert!(group.is_poisoned());

    let late = participants[1].all_gather(&ready(1, &[], &[1.0])).unwrap_err();
    assert!(matches!(late, Error::CollectiveTimeout { .. }));
}

#[test]
fn test_failed_operand_aborts_group() {
    let group = CollectiveGroup::with_size(2);
    let participants = group.participants();
    let broken = Buffer::pending(DeviceSpec::tpu(0), CanonicalShape::scalar(DType::Float32));
    broken.fail(Failure::msg("kernel fault"));

    let results = thread::scope(|scope| {
        let waiting = scope.spawn(|| participants[1].all_gather(&ready(1, &[], &[1.0])));
        let failing = participants[0].all_gather(&broken);
        [failing, waiting.join().unwrap()]
    });

    assert!(matches!(&results[0], Err(Error::Device { .. })));
    assert!(results[0].as_ref().unwrap_err().to_string().contains("kernel fault"));
    match &results[1] {
        Err(Error::CollectiveAborted { rank, reason }) => {
            assert_eq!(*rank, 0);
            assert!(reason.contains("kernel fault"), "{reason}");
        }
        other => panic!("expected abort, got {other:?}"),
    }
}

#[test]
fn test_participant_rank_range() {
    let group = CollectiveGroup::with_size(2);
    assert_eq!(group.participant(1).unwrap().rank(), 1);
    assert!(matches!(group.participant(2), Err(Error::InvalidRank { rank: 2, size: 2 })));
    let err = group.participant(0).unwrap().broadcast(3, &ready(0, &[], &[0.0])).unwrap_err();
    assert!(matches!(err, Error::InvalidRank { rank: 3, .. }));
}
