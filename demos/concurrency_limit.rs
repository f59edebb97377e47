use futures::future::join_all;
use futures_fanout::FanOut;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::info;

async fn long_task_fn(id: usize) -> Result<(), String> {
  info!("Task {} starting (concurrency test - should take 1s)", id);
  tokio::time::sleep(Duration::from_secs(1)).await;
  info!("Task {} finished", id);
  Ok(())
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Concurrency Limit Example (Limit: 2) ---");

  let concurrency_limit = 2;
  let fan_out = FanOut::<String>::new(concurrency_limit, Handle::current(), "concurrency_fan_out")
    .expect("capacity is non-zero");

  let num_tasks = 5;
  info!(
    "Running {} tasks, each takes 1 sec. With concurrency {}, this should take ~{} secs.",
    num_tasks,
    concurrency_limit,
    (num_tasks as f32 / concurrency_limit as f32).ceil()
  );

  let started = Instant::now();
  let runs = (0..num_tasks).map(|i| fan_out.run(long_task_fn, i));
  // join! polls the runs first, so all of them queue on the gate ahead of the drain.
  let (results, errors) = tokio::join!(join_all(runs), fan_out.wait());

  for (i, result) in results.into_iter().enumerate() {
    if let Err(e) = result {
      tracing::error!("Task {} was not run: {}", i, e);
    }
  }
  info!("wait() returned {:?} after {:?}", errors, started.elapsed());
  info!("--- Concurrency Limit Example End ---");
}
