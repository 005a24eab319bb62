//! Result delivery.
//!
//! Delivery is at-most-once: a failed send is logged and dropped.

use std::time::Duration;

use crate::job::PlateReading;

/// Downstream collector for plate readings.
pub trait ResultSink {
    /// Deliver one reading. Never fails from the caller's point of view.
    fn send(&mut self, reading: &PlateReading);
}

impl<T: ResultSink + ?Sized> ResultSink for Box<T> {
    fn send(&mut self, reading: &PlateReading) {
        (**self).send(reading)
    }
}

/// Posts each reading as JSON to the collector webhook.
pub struct HttpResultSink {
    agent: ureq::Agent,
    url: String,
}

impl HttpResultSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url: url.into(),
        }
    }
}

impl ResultSink for HttpResultSink {
    fn send(&mut self, reading: &PlateReading) {
        log::info!(
            "sending plate {} for job {}",
            reading.plate_text,
            reading.job_id
        );
        match self.agent.post(&self.url).send_json(reading) {
            Ok(response) => log::info!("plate webhook status: {}", response.status()),
            Err(ureq::Error::Status(code, _)) => log::warn!("plate webhook status: {}", code),
            Err(e) => log::warn!("plate webhook error: {}", e),
        }
    }
}
