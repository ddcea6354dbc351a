//! Domain services held by the [`Application`](crate::app::Application).

pub mod ids;
pub mod mail;
pub mod password;
pub mod validation;

pub use ids::IdGenerator;
pub use mail::{EmailMessage, LogMailer, Mailer};
pub use password::PasswordService;
pub use validation::{NewUser, Validator};
