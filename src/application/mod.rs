pub mod account_service;

pub use account_service::{
    AccountResponse, AccountService, AuthRequest, AuthResponse, CreateAccountRequest, ServiceError,
};
