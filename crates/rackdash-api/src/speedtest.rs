// Network speed-test endpoints
//
// The upstream runs the measurement itself; we start a run and then read
// back the latest result until it reaches a terminal status.

use secrecy::SecretString;
use serde_json::{Value, json};
use tracing::debug;

use crate::client::ApiClient;
use crate::error::Error;
use crate::models::RawSpeedTest;

impl ApiClient {
    /// Ask the upstream to start a speed test for the network.
    ///
    /// `POST /networks/{network_id}/speedtest`
    pub async fn start_speedtest(&self, network_id: &str, token: &SecretString) -> Result<(), Error> {
        let url = self.network_url(network_id, "speedtest")?;
        debug!("starting upstream speed test");
        let _: Option<Value> = self.post_json(url, Some(token), &json!({})).await?;
        Ok(())
    }

    /// Read the most recent speed-test run.
    ///
    /// `GET /networks/{network_id}/speedtest`. Some API revisions return a
    /// list of runs (newest first); only the head is kept.
    pub async fn speedtest_status(
        &self,
        network_id: &str,
        token: &SecretString,
    ) -> Result<RawSpeedTest, Error> {
        let url = self.network_url(network_id, "speedtest")?;
        let data: Option<Value> = self.get(url, token).await?;
        let latest = match data {
            Some(Value::Array(mut runs)) if !runs.is_empty() => runs.swap_remove(0),
            Some(Value::Array(_) | Value::Null) | None => return Ok(RawSpeedTest::default()),
            Some(other) => other,
        };
        serde_json::from_value(latest.clone()).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: latest.to_string(),
        })
    }
}
