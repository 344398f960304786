// Network device inventory endpoint

use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use crate::client::ApiClient;
use crate::error::Error;
use crate::models::DeviceListData;

impl ApiClient {
    /// List every device record known to the network.
    ///
    /// `GET /networks/{network_id}/devices`
    ///
    /// Records are returned as raw JSON; decoding happens per record so one
    /// malformed entry cannot fail the whole inventory.
    pub async fn list_devices(
        &self,
        network_id: &str,
        token: &SecretString,
    ) -> Result<Vec<Value>, Error> {
        let url = self.network_url(network_id, "devices")?;
        let data: DeviceListData = self.get(url, token).await?;
        let records = data.into_records();
        debug!(count = records.len(), "fetched device records");
        Ok(records)
    }
}
