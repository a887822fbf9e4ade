pub mod checkout;
pub mod tours;

use std::sync::Arc;

use crate::backend::{
    CouponBackend, ExchangeRateBackend, PaymentMethodBackend, ReceiptBackend, TourBackend,
    TransactionBackend,
};
use crate::cache::InMemoryCache;
use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::providers::Gateways;
use crate::services::{
    CheckoutService, CouponService, PaymentMethodService, PaymentService, TourService,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub tours: Arc<TourService>,
}

impl AppServices {
    /// Wires the service graph over a single backend client. Tests pass a
    /// fake here; production passes the HTTP backend.
    pub fn build<B>(
        config: &AppConfig,
        backend: Arc<B>,
        gateways: Gateways,
        cache: Arc<InMemoryCache>,
        event_sender: Arc<EventSender>,
    ) -> Self
    where
        B: CouponBackend
            + PaymentMethodBackend
            + TransactionBackend
            + ReceiptBackend
            + ExchangeRateBackend
            + TourBackend
            + 'static,
    {
        let coupon_backend: Arc<dyn CouponBackend> = backend.clone();
        let method_backend: Arc<dyn PaymentMethodBackend> = backend.clone();
        let transaction_backend: Arc<dyn TransactionBackend> = backend.clone();
        let receipt_backend: Arc<dyn ReceiptBackend> = backend.clone();
        let rate_backend: Arc<dyn ExchangeRateBackend> = backend.clone();
        let tour_backend: Arc<dyn TourBackend> = backend;

        let fallback_rate = config.usd_mur_fallback();
        let coupons = Arc::new(CouponService::new(coupon_backend, Arc::clone(&event_sender)));
        let payment_methods = Arc::new(PaymentMethodService::new(
            method_backend,
            Arc::clone(&rate_backend),
            fallback_rate,
        ));
        let payments = Arc::new(PaymentService::new(
            transaction_backend,
            receipt_backend,
            rate_backend,
            Arc::clone(&coupons),
            gateways,
            Arc::clone(&event_sender),
            fallback_rate,
            config.payment_test_mode,
        ));
        let checkout = Arc::new(CheckoutService::new(
            Arc::clone(&cache),
            coupons,
            payment_methods,
            payments,
            Arc::clone(&event_sender),
            config.session_ttl(),
        ));
        let tours = Arc::new(TourService::new(
            tour_backend,
            cache,
            event_sender,
            config.tour_freshness_window(),
            config.tour_start_delay_ms,
            config.session_ttl(),
        ));

        Self { checkout, tours }
    }
}
