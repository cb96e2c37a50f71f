//! End-to-end sessions: inputs, multiplication, and the closing check,
//! wired through the public API the way a front end would drive it.

use repshare::algebra::Mersenne61;
use repshare::config::SessionConfig;
use repshare::correlator::Correlator;
use repshare::crypto::Prg;
use repshare::net::TcpNetwork;
use repshare::protocols::mult::{CheckData, Mult};
use repshare::protocols::{check::Check, coin, input};
use repshare::sharing::arithmetic::ShareArithmetic;
use repshare::sharing::Replicator;
use repshare::testing::Cluster;
use rand::SeedableRng;

type F = Mersenne61;

#[tokio::test]
async fn full_session_with_inputs_mult_and_check() {
    let n = 7;
    let replicator = Replicator::for_parties(n).unwrap();
    let x = F::from(100u64);
    let y = F::from(200u64);

    let outputs = Cluster::new(n)
        .run({
            let replicator = replicator.clone();
            move |mut network| {
                let replicator = replicator.clone();
                async move {
                    let me = network.id();
                    let t = replicator.threshold();
                    let arithmetic = ShareArithmetic::new(me, t, n).unwrap();
                    let mut local_prg = Prg::from_seed([me as u8 + 101; 16]);

                    // Session setup: correlated randomness and mask keys.
                    let mut correlator =
                        Correlator::setup::<F, _>(&replicator, &mut network, &mut local_prg)
                            .await
                            .unwrap();
                    let mut masks = input::setup::<F, _>(&replicator, &mut network, &mut local_prg)
                        .await
                        .unwrap();

                    // Parties 1 and 4 inject the factors.
                    let mut inputs = input::Input::new(&arithmetic, &mut masks);
                    match me {
                        1 => inputs.prepare(F::from(100u64)),
                        4 => inputs.prepare(F::from(200u64)),
                        _ => {}
                    }
                    if me != 1 {
                        inputs.prepare_to_receive(1);
                    }
                    if me != 4 {
                        inputs.prepare_to_receive(4);
                    }
                    let shares = inputs.run(&mut network).await.unwrap();
                    let share_x = shares[1][0].clone();
                    let share_y = shares[4][0].clone();

                    // One multiplication through the designated reconstructor.
                    let mut check_data = CheckData::new(t);
                    let mut mult = Mult::new(&arithmetic, &mut correlator, &mut check_data);
                    mult.prepare(&share_x, &share_y);
                    let products = mult.run(&mut network).await.unwrap();

                    // Close the session with the batched check.
                    let mut rng = rand::rngs::StdRng::from_os_rng();
                    let mut shared = coin::shared_prg(&mut network, &mut rng).await.unwrap();
                    Check::new(&arithmetic, &check_data)
                        .run(&mut network, &mut shared)
                        .await
                        .unwrap();

                    products[0].clone()
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(replicator.error_detect(&outputs).unwrap(), x * y);
}

#[tokio::test]
async fn sums_and_scalings_survive_a_session() {
    let n = 10;
    let replicator = Replicator::for_parties(n).unwrap();
    let a = F::from(10u64);
    let b = F::from(20u64);

    let outputs = Cluster::new(n)
        .run({
            let replicator = replicator.clone();
            move |mut network| {
                let replicator = replicator.clone();
                async move {
                    let me = network.id();
                    let t = replicator.threshold();
                    let arithmetic = ShareArithmetic::new(me, t, n).unwrap();
                    let mut local_prg = Prg::from_seed([me as u8 + 31; 16]);
                    let mut masks = input::setup::<F, _>(&replicator, &mut network, &mut local_prg)
                        .await
                        .unwrap();

                    let mut inputs = input::Input::new(&arithmetic, &mut masks);
                    match me {
                        0 => inputs.prepare(F::from(10u64)),
                        5 => inputs.prepare(F::from(20u64)),
                        _ => {}
                    }
                    if me != 0 {
                        inputs.prepare_to_receive(0);
                    }
                    if me != 5 {
                        inputs.prepare_to_receive(5);
                    }
                    let shares = inputs.run(&mut network).await.unwrap();

                    let sum = arithmetic.add(&shares[0][0], &shares[5][0]);
                    let scaled = arithmetic.mul_constant(&shares[0][0], F::from(20u64));
                    (sum, scaled)
                }
            }
        })
        .await
        .unwrap();

    let sums: Vec<_> = outputs.iter().map(|(sum, _)| sum.clone()).collect();
    let scaled: Vec<_> = outputs.iter().map(|(_, scaled)| scaled.clone()).collect();
    assert_eq!(replicator.error_detect(&sums).unwrap(), a + b);
    assert_eq!(replicator.error_detect(&scaled).unwrap(), F::from(200u64));
}

#[tokio::test]
async fn tcp_parties_follow_the_port_scheme() {
    let n = 4;
    let base_port = 14300;

    let mut tasks = Vec::new();
    for id in 0..n {
        tasks.push(tokio::spawn(async move {
            let config = SessionConfig::all_local(n, id, base_port).unwrap();
            let mut network = TcpNetwork::connect(&config).await.unwrap();
            assert_eq!(network.id(), id);
            assert_eq!(network.size(), n);

            let posts = network.symmetric_broadcast(id as u64).await.unwrap();
            assert_eq!(posts, vec![0, 1, 2, 3]);

            let summary = network.communication_summary();
            network.shutdown().await.unwrap();
            summary
        }));
    }

    for task in tasks {
        let summary = task.await.unwrap();
        let talked_to = summary
            .per_peer
            .iter()
            .filter(|(sent, received)| *sent > 0 && *received > 0)
            .count();
        assert_eq!(talked_to, n - 1);
    }
}

#[tokio::test]
async fn tcp_multiplication_round_trip() {
    let n = 4;
    let base_port = 15100;
    let replicator = Replicator::for_parties(n).unwrap();
    let mut deal_prg = Prg::from_seed([5u8; 16]);
    let x = F::from(12u64);
    let y = F::from(34u64);
    let shares_x = replicator.share(x, &mut deal_prg);
    let shares_y = replicator.share(y, &mut deal_prg);

    let mut tasks = Vec::new();
    for id in 0..n {
        let replicator = replicator.clone();
        let share_x = shares_x[id].clone();
        let share_y = shares_y[id].clone();
        tasks.push(tokio::spawn(async move {
            let config = SessionConfig::all_local(n, id, base_port).unwrap();
            let mut network = TcpNetwork::connect(&config).await.unwrap();
            let t = config.threshold();
            let arithmetic = ShareArithmetic::new(id, t, n).unwrap();
            let mut local_prg = Prg::from_seed([id as u8 + 61; 16]);
            let mut correlator =
                Correlator::setup::<F, _>(&replicator, &mut network, &mut local_prg)
                    .await
                    .unwrap();
            let mut check_data = CheckData::new(t);

            let mut mult = Mult::new(&arithmetic, &mut correlator, &mut check_data);
            mult.prepare(&share_x, &share_y);
            let products = mult.run(&mut network).await.unwrap();

            let mut rng = rand::rngs::StdRng::from_os_rng();
            let mut shared = coin::shared_prg(&mut network, &mut rng).await.unwrap();
            Check::new(&arithmetic, &check_data)
                .run(&mut network, &mut shared)
                .await
                .unwrap();

            network.shutdown().await.unwrap();
            products[0].clone()
        }));
    }

    let mut outputs = Vec::new();
    for task in tasks {
        outputs.push(task.await.unwrap());
    }
    assert_eq!(replicator.error_detect(&outputs).unwrap(), x * y);
}
