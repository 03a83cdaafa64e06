pub mod api;
pub mod lifecycle;
pub mod models;
pub mod paystack;
pub mod quota;
pub mod service;

pub use models::{Subscription, SubscriptionStatus, Tier, UserPreferences};
pub use paystack::{PaymentGateway, PaystackGateway};
pub use service::{ApplyOutcome, BillingService, BillingStore};
