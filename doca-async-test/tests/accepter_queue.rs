//! Accepter-queue ordering across arbitrary supply/accept interleavings.

use doca_async::coro::AccepterQueue;
use doca_async::Error;
use doca_async_test::block_on;
use std::rc::Rc;

/// Replays an interleaving of supplies and accepts and checks that payloads
/// come out in supply order regardless of which side got ahead.
fn check_interleaving(ops: &[Op]) {
    block_on(async {
        let queue = Rc::new(AccepterQueue::<u32>::new());
        let mut supplied = 0u32;
        let mut accepters = Vec::new();

        for op in ops {
            match op {
                Op::Supply => {
                    queue.supply(supplied);
                    supplied += 1;
                }
                Op::Accept => {
                    let queue = queue.clone();
                    accepters.push(tokio::task::spawn_local(async move {
                        queue.accept().await
                    }));
                    // let the accepter park itself before the next op
                    tokio::task::yield_now().await;
                }
            }
        }

        // drain any accepters still waiting
        let outstanding = accepters.len() as u32;
        for value in supplied..outstanding.max(supplied) {
            queue.supply(value);
        }

        for (i, accepter) in accepters.into_iter().enumerate() {
            assert_eq!(accepter.await.unwrap(), Ok(i as u32));
        }
    });
}

#[derive(Clone, Copy)]
enum Op {
    Supply,
    Accept,
}

#[test]
fn payloads_first() {
    use Op::*;
    check_interleaving(&[Supply, Supply, Supply, Accept, Accept, Accept]);
}

#[test]
fn accepters_first() {
    use Op::*;
    check_interleaving(&[Accept, Accept, Accept, Supply, Supply, Supply]);
}

#[test]
fn alternating() {
    use Op::*;
    check_interleaving(&[Accept, Supply, Supply, Accept, Accept, Supply, Accept]);
}

#[test]
fn disconnect_is_terminal_for_every_pending_and_future_accept() {
    block_on(async {
        let queue = Rc::new(AccepterQueue::<u32>::new());
        let mut pending = Vec::new();
        for _ in 0..3 {
            let queue = queue.clone();
            pending.push(tokio::task::spawn_local(
                async move { queue.accept().await },
            ));
            tokio::task::yield_now().await;
        }

        queue.disconnect();
        for waiter in pending {
            assert_eq!(waiter.await.unwrap(), Err(Error::NotConnected));
        }
        assert_eq!(queue.accept().await, Err(Error::NotConnected));
        assert!(queue.is_disconnected());
    });
}
