//! Resource pool walkthrough.
//!
//! Pools an in-memory "connection" type to show acquisition, concurrent
//! borrowing, status monitoring and the drain/clear shutdown sequence.
//!
//! # Running
//!
//! ```bash
//! cargo run -p pgq-pool --example resource_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use pgq_pool::{Pool, PoolConfig, PoolError, ResourceFactory};
use tokio::time::Instant;

struct Session {
    id: u64,
}

#[derive(Default)]
struct SessionFactory {
    next_id: AtomicU64,
}

#[async_trait::async_trait]
impl ResourceFactory for SessionFactory {
    type Resource = Session;
    type Error = std::io::Error;

    async fn create(&self) -> Result<Session, std::io::Error> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        println!("  + opened session {id}");
        Ok(Session { id })
    }

    async fn validate(&self, _session: &mut Session) -> bool {
        true
    }

    async fn destroy(&self, session: Session) -> Result<(), std::io::Error> {
        println!("  - closed session {}", session.id);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    println!("=== Resource Pool Example ===\n");

    let pool_config = PoolConfig::new()
        .min_resources(2)
        .max_resources(5)
        .acquire_timeout(Duration::from_secs(2))
        .idle_timeout(Duration::from_secs(30));

    println!("Pool configuration:");
    println!("  Min resources: {}", pool_config.min_resources);
    println!("  Max resources: {}", pool_config.max_resources);
    println!("  Idle timeout: {:?}", pool_config.idle_timeout);
    println!();

    let pool = Arc::new(Pool::new(pool_config, SessionFactory::default())?);

    println!("Pool created, waiting for minimum resources...");
    tokio::time::sleep(Duration::from_millis(100)).await;
    print_pool_status(&pool);

    println!("\n1. Basic pool usage:");
    {
        let session = pool.get(None).await?;
        println!("  Borrowed session {}", session.id);
        // Session is automatically returned to pool when dropped
    }

    println!("\n2. Concurrent pool usage (10 parallel borrowers):");
    let start = Instant::now();
    let mut handles = vec![];
    for i in 0..10 {
        let pool = Arc::clone(&pool);
        handles.push(tokio::spawn(async move {
            let session = pool.get(None).await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            let id = session.id;
            pool.release(session)?;
            Ok::<_, PoolError>((i, id))
        }));
    }

    let mut completed = 0;
    for handle in handles {
        if handle.await?.is_ok() {
            completed += 1;
        }
    }
    println!("  Completed {completed} borrows in {:?}", start.elapsed());
    print_pool_status(&pool);

    println!("\n3. Graceful shutdown:");
    pool.drain().await?;
    pool.clear().await?;
    print_pool_status(&pool);

    Ok(())
}

fn print_pool_status(pool: &Pool<SessionFactory>) {
    let status = pool.status();
    println!(
        "  Status: {} idle, {} in use, {} total ({:.1}% utilization)",
        status.available,
        status.in_use,
        status.total,
        status.utilization()
    );
}
