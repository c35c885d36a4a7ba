use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::store::Store;

/// Share of the keyspace examined per cycle.
const SAMPLE_RATIO: f64 = 0.2;

/// Perpetual background sampler. Each cycle reads `ceil(0.2 * len)` random
/// keys through the store's regular read path, which evicts any that have
/// expired, then sleeps `interval` or exits on cancellation.
pub async fn run(store: Rc<RefCell<Store>>, interval: Duration, shutdown: CancellationToken) {
    info!(interval_seconds = interval.as_secs(), "expiry sampler: up");
    loop {
        sample(&store);
        tokio::select! {
            _ = time::sleep(interval) => {}
            _ = shutdown.cancelled() => {
                debug!("expiry sampler: down");
                return;
            }
        }
    }
}

fn sample(store: &Rc<RefCell<Store>>) {
    let mut store = store.borrow_mut();
    let size = store.len();
    if size == 0 {
        return;
    }
    let count = (size as f64 * SAMPLE_RATIO).ceil() as usize;
    for _ in 0..count {
        let Some(key) = store.random_key() else {
            break;
        };
        let _ = store.get(&key);
    }
}
