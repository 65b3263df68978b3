pub mod attempt_repository;
pub mod notification_repository;

pub use attempt_repository::AttemptRepository;
pub use notification_repository::{DlqFilter, DlqStats, NotificationRepository};
