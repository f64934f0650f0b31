use crate::run_on_ranks;
use fenris_estimators::comm::{Communicator, SerialCommunicator};

#[test]
fn serial_communicator_is_identity() {
    let comm = SerialCommunicator;
    assert_eq!(comm.rank(), 0);
    assert_eq!(comm.size(), 1);
    assert_eq!(comm.all_reduce_sum(2.5), 2.5);
    assert_eq!(comm.all_reduce_max(-1.0), -1.0);
    assert_eq!(comm.exchange(vec![(0, vec![1.0, 2.0])]).unwrap(), vec![(0, vec![1.0, 2.0])]);

    let err = comm.exchange(vec![(1, vec![1.0])]).unwrap_err();
    assert_eq!(err.peer(), 1);
}

#[test]
fn thread_communicator_reductions_agree_on_all_ranks() {
    let results = run_on_ranks(4, |comm| {
        let value = comm.rank() as f64 + 0.1;
        (comm.size(), comm.all_reduce_sum(value), comm.all_reduce_max(value))
    });
    let expected_sum = 0.1 + 1.1 + 2.1 + 3.1;
    for (size, sum, max) in &results {
        assert_eq!(*size, 4);
        assert_eq!(*sum, results[0].1);
        assert!((sum - expected_sum).abs() < 1e-12);
        assert_eq!(*max, 3.1);
    }
}

#[test]
fn thread_communicator_exchanges_with_ring_neighbors() {
    let received = run_on_ranks(3, |comm| {
        let rank = comm.rank();
        let size = comm.size();
        let left = (rank + size - 1) % size;
        let right = (rank + 1) % size;
        let mut received = Vec::new();
        // Several rounds in a row must not mix up messages
        for round in 0..3 {
            let outgoing = vec![
                (right, vec![rank as f64, round as f64]),
                (left, vec![-(rank as f64), round as f64]),
            ];
            received.push(comm.exchange(outgoing).unwrap());
        }
        received
    });

    for (rank, rounds) in received.iter().enumerate() {
        let left = (rank + 2) % 3;
        let right = (rank + 1) % 3;
        for (round, incoming) in rounds.iter().enumerate() {
            assert_eq!(
                incoming,
                &vec![
                    (right, vec![-(right as f64), round as f64]),
                    (left, vec![left as f64, round as f64]),
                ]
            );
        }
    }
}
