pub mod attempt;
pub mod notification;

pub use self::attempt::*;
pub use self::notification::*;
