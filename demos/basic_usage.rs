use futures_fanout::FanOut;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

async fn my_task_fn(id: usize, delay_ms: u64) -> Result<(), String> {
  info!("Task {} starting, will sleep for {}ms", id, delay_ms);
  tokio::time::sleep(Duration::from_millis(delay_ms)).await;
  if id % 3 == 2 {
    info!("Task {} failed after {}ms", id, delay_ms);
    return Err(format!("task {} could not finish", id));
  }
  info!("Task {} finished successfully after {}ms", id, delay_ms);
  Ok(())
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let fan_out = FanOut::<String>::new(2, Handle::current(), "basic_fan_out").expect("capacity is non-zero");

  let mut callers = Vec::new();
  for i in 0..6 {
    // Alternate sleep times for variety
    let sleep_duration: u64 = 200 + (i as u64 % 3 * 150);
    let fan_out = fan_out.clone();
    callers.push(tokio::spawn(async move {
      fan_out
        .run(|(id, delay_ms): (usize, u64)| my_task_fn(id, delay_ms), (i, sleep_duration))
        .await
    }));
  }

  for caller in callers {
    match caller.await {
      Ok(Ok(())) => {}
      Ok(Err(e)) => tracing::error!("Runner rejected a task: {}", e),
      Err(e) => tracing::error!("Caller task failed: {}", e),
    }
  }

  info!("All tasks submitted and finished. Collecting errors...");
  match fan_out.wait().await {
    Ok(None) => info!("No task reported an error."),
    Ok(Some(errors)) => {
      info!("{} task(s) reported errors:", errors.len());
      for err in errors {
        info!("  {}", err);
      }
    }
    Err(e) => tracing::error!("wait() failed: {}", e),
  }
  info!("--- Basic Usage Example End ---");
}
