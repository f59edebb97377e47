//! A Tokio-based fan-out runner: bounds how many caller-driven futures run at
//! once and aggregates the errors they return.
//!
//! ```
//! use futures_fanout::FanOut;
//! use tokio::runtime::Handle;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let fan_out = FanOut::<String>::new(2, Handle::current(), "docs").unwrap();
//!
//! let mut callers = Vec::new();
//! for i in 0..4u32 {
//!   let fan_out = fan_out.clone();
//!   callers.push(tokio::spawn(async move {
//!     fan_out
//!       .run(
//!         |n: u32| async move {
//!           if n % 2 == 1 {
//!             return Err(format!("task {} failed", n));
//!           }
//!           Ok(())
//!         },
//!         i,
//!       )
//!       .await
//!   }));
//! }
//! for caller in callers {
//!   caller.await.unwrap().unwrap();
//! }
//!
//! let errors = fan_out.wait().await.unwrap().expect("two tasks failed");
//! assert_eq!(errors.len(), 2);
//! # }
//! ```

mod collector;
mod error;
mod fan_out;
mod slot;

pub use error::FanOutError;
pub use fan_out::{FanOut, FanOutState};
