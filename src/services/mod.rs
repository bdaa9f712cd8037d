//! Services layer - Business logic
//!
//! Services are responsible for:
//! - Implementing the account and session rules
//! - Coordinating between repositories, tokens and mail
//! - Handling validation and error cases

pub mod activation;
pub mod auth;
pub mod email;
pub mod password;
pub mod token;
pub mod user;
pub mod validation;

pub use activation::ActivationService;
pub use auth::{
    AuthService, AuthServiceError, AuthSession, ChangePasswordInput, LoginInput, RegisterInput,
};
pub use email::{mailer_from_config, LogMailer, MailSender, SmtpMailer};
pub use password::{hash_password, verify_password};
pub use token::{TokenClaims, TokenPair, TokenPayload, TokenService, TokenSettings};
pub use user::{UpdateProfileInput, UserService, UserServiceError};
