//! Shared request context: configuration, store handles, and adapters.
//!
//! Everything here is initialized once at server start and immutable after;
//! handlers receive it through an `Extension<Arc<AppContext>>` layer.

use std::sync::Arc;

use crate::api::sms::SmsSender;
use crate::api::upi::UpiClient;
use crate::kv::KvStore;
use crate::otp::OtpEngine;

pub struct AppContext {
    kv: Arc<dyn KvStore>,
    sms: Arc<dyn SmsSender>,
    upi: Arc<dyn UpiClient>,
    otp: OtpEngine,
    jwt_secret: Vec<u8>,
    upi_enabled: bool,
}

impl AppContext {
    #[must_use]
    pub fn new(
        kv: Arc<dyn KvStore>,
        sms: Arc<dyn SmsSender>,
        upi: Arc<dyn UpiClient>,
        jwt_secret: Vec<u8>,
        upi_enabled: bool,
    ) -> Self {
        let otp = OtpEngine::new(kv.clone(), sms.clone());
        Self {
            kv,
            sms,
            upi,
            otp,
            jwt_secret,
            upi_enabled,
        }
    }

    #[must_use]
    pub fn kv(&self) -> &dyn KvStore {
        self.kv.as_ref()
    }

    #[must_use]
    pub fn sms(&self) -> &dyn SmsSender {
        self.sms.as_ref()
    }

    #[must_use]
    pub fn upi(&self) -> &dyn UpiClient {
        self.upi.as_ref()
    }

    #[must_use]
    pub fn otp(&self) -> &OtpEngine {
        &self.otp
    }

    #[must_use]
    pub fn jwt_secret(&self) -> &[u8] {
        &self.jwt_secret
    }

    /// Whether the external UPI/IFSC provider is enabled; with it disabled,
    /// format validation alone suffices for payment steps.
    #[must_use]
    pub fn upi_enabled(&self) -> bool {
        self.upi_enabled
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::api::sms::LogSmsSender;
    use crate::api::upi::DisabledUpiClient;
    use crate::kv::MemoryKv;

    /// Context over in-memory adapters for handler tests.
    pub(crate) fn memory_context() -> Arc<AppContext> {
        Arc::new(AppContext::new(
            Arc::new(MemoryKv::new()),
            Arc::new(LogSmsSender),
            Arc::new(DisabledUpiClient),
            b"test-secret-not-for-production".to_vec(),
            false,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::memory_context;

    #[test]
    fn context_exposes_adapters() {
        let ctx = memory_context();
        assert!(!ctx.upi_enabled());
        assert_eq!(ctx.jwt_secret(), b"test-secret-not-for-production");
    }
}
