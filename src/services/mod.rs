// Checkout orchestration
pub mod checkout;
pub mod coupons;
pub mod payment_methods;
pub mod payments;
pub mod providers;

// Guided tours
pub mod tooltip;
pub mod tours;

pub use checkout::CheckoutService;
pub use coupons::CouponService;
pub use payment_methods::PaymentMethodService;
pub use payments::{CaptureOutcome, CaptureRequest, PaymentService};
pub use tours::TourService;
