// Core models
pub mod checkout;
pub mod coupon;
pub mod payment_method;
pub mod tier;
pub mod tour;
pub mod transaction;

pub use checkout::{CheckoutSession, CheckoutStatus, CheckoutStep};
pub use coupon::CouponApplication;
pub use payment_method::{CardDetails, PaymentMethod, PaymentProvider};
pub use tier::{BillingCycle, PaymentSelection};
pub use tour::{Hint, HintPosition, HintProgress, TourDefinition, TourState, TourStatus};
pub use transaction::{
    NewTransaction, PaymentTransaction, TransactionMetadata, TransactionStatus, TransactionUpdate,
};
