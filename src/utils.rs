pub mod alert;
pub mod error;
pub mod formatting;
pub mod logging;
pub mod task;

pub use self::alert::Notifier;
pub use self::error::AppError;
