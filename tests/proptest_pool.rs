use lifopool::{ManagedConnection, ManualClock, MemoryConnection, MemoryFactory, Pool, PoolConfig};
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
enum Op {
    Acquire,
    /// Release the n-th held connection (mod held count)
    Release(usize),
    /// Close the n-th held connection, then release it
    CloseAndRelease(usize),
    /// Open a transaction on the n-th held connection, then release it
    ReleaseMidTransaction(usize),
    /// Release the n-th held connection, then release it again
    ReleaseTwice(usize),
    Advance(u64),
    Purge,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => Just(Op::Acquire),
        3 => any::<usize>().prop_map(Op::Release),
        1 => any::<usize>().prop_map(Op::CloseAndRelease),
        1 => any::<usize>().prop_map(Op::ReleaseMidTransaction),
        1 => any::<usize>().prop_map(Op::ReleaseTwice),
        1 => (0u64..20).prop_map(Op::Advance),
        1 => Just(Op::Purge),
    ]
}

fn take(held: &mut Vec<Arc<MemoryConnection>>, n: usize) -> Option<Arc<MemoryConnection>> {
    if held.is_empty() {
        None
    } else {
        let idx = n % held.len();
        Some(held.swap_remove(idx))
    }
}

proptest! {
    /// Property: idle + in-use never exceeds max_connections
    #[test]
    fn prop_capacity_never_exceeded(
        min in 0usize..3,
        extra in 1usize..4,
        timeout_secs in prop::option::of(0u64..10),
        ops in prop::collection::vec(arb_op(), 1..120),
    ) {
        let max = min + extra;
        let mut config = PoolConfig::new(min, max);
        config = match timeout_secs {
            Some(secs) => config.idle_timeout(Duration::from_secs(secs)),
            None => config.no_idle_timeout(),
        };
        let clock = Arc::new(ManualClock::new());
        let pool = Pool::with_clock(config, MemoryFactory::new(), clock.clone()).unwrap();
        let mut held: Vec<Arc<MemoryConnection>> = Vec::new();

        for op in ops {
            match op {
                Op::Acquire => match pool.acquire() {
                    Ok(conn) => {
                        prop_assert!(!conn.is_closed());
                        prop_assert!(!conn.is_mid_transaction());
                        prop_assert!(held.iter().all(|h| !Arc::ptr_eq(h, &conn)));
                        held.push(conn);
                    }
                    Err(e) => {
                        prop_assert!(e.is_exhausted());
                        prop_assert_eq!(held.len() + pool.idle_count(), max);
                    }
                },
                Op::Release(n) => {
                    if let Some(conn) = take(&mut held, n) {
                        pool.release(conn);
                    }
                }
                Op::CloseAndRelease(n) => {
                    if let Some(conn) = take(&mut held, n) {
                        conn.close().unwrap();
                        pool.release(conn);
                    }
                }
                Op::ReleaseMidTransaction(n) => {
                    if let Some(conn) = take(&mut held, n) {
                        conn.begin().unwrap();
                        pool.release(conn);
                    }
                }
                Op::ReleaseTwice(n) => {
                    if let Some(conn) = take(&mut held, n) {
                        pool.release(conn.clone());
                        pool.release(conn);
                    }
                }
                Op::Advance(secs) => clock.advance(Duration::from_secs(secs)),
                Op::Purge => pool.purge(),
            }

            prop_assert_eq!(pool.in_use_count(), held.len());
            prop_assert!(pool.in_use_count() + pool.idle_count() <= max);
            let idle = pool.idle_connections();
            for (i, conn) in idle.iter().enumerate() {
                prop_assert!(!conn.is_mid_transaction());
                prop_assert!(held.iter().all(|h| !Arc::ptr_eq(h, conn)));
                prop_assert!(idle[i + 1..].iter().all(|other| !Arc::ptr_eq(other, conn)));
            }
        }
    }

    /// Property: connections come back out in reverse release order
    #[test]
    fn prop_lifo_reuse(count in 1usize..8) {
        let pool = Pool::new(PoolConfig::new(0, count).no_idle_timeout(), MemoryFactory::new()).unwrap();
        let conns: Vec<_> = (0..count).map(|_| pool.acquire().unwrap()).collect();
        for conn in &conns {
            pool.release(conn.clone());
        }

        for expected in conns.iter().rev() {
            let conn = pool.acquire().unwrap();
            prop_assert!(Arc::ptr_eq(&conn, expected));
        }
    }
}
