//! Operations against one health record.

use bytes::Bytes;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;
use uuid::Uuid;
use vaultlink_wire::{RecordReference, Request};

use crate::blob::BlobPutTicket;
use crate::client::VaultClient;
use crate::error::{ClientError, TransportError, VaultError, VaultResult, require_ok};
use crate::items::{
    ItemKey, ItemPayload, ItemQuery, ItemQueryResult, TypePermission, keys_to_body_xml,
    parse_item_keys,
};

/// Operations bound to one record. Cheap to create; holds no state beyond
/// the reference and a cancellation token.
pub struct RecordOps<'a> {
    client: &'a VaultClient,
    record: RecordReference,
    cancel: CancellationToken,
}

impl<'a> RecordOps<'a> {
    pub(crate) fn new(
        client: &'a VaultClient,
        record: RecordReference,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            record,
            cancel,
        }
    }

    pub fn record(&self) -> RecordReference {
        self.record
    }

    fn request(&self, method: &str, version: u32) -> Request {
        Request::new(method, version)
            .with_record(self.record)
            .needing_online_token()
    }

    async fn execute(&self, request: Request) -> VaultResult<vaultlink_wire::Response> {
        require_ok(
            self.client
                .execute_with_cancel(request, self.cancel.clone())
                .await?,
        )
    }

    /// Runs one query group and returns the raw item fragments.
    pub async fn get_items(&self, query: &ItemQuery) -> VaultResult<ItemQueryResult> {
        let request = self.request("GetItems", 3).with_body(query.to_body_xml()?);
        let response = self.execute(request).await?;
        let body = response.body.as_deref().unwrap_or_default();
        Ok(ItemQueryResult::parse(body)?)
    }

    /// Stores items and returns the key the service assigned to each, in
    /// input order.
    pub async fn put_items(&self, items: &[ItemPayload]) -> VaultResult<Vec<ItemKey>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let mut body = String::new();
        for item in items {
            body.push_str(&item.to_item_xml()?);
        }
        self.put_items_raw(&body).await
    }

    /// Same as [`RecordOps::put_items`] for callers that already hold
    /// serialized `item` elements.
    pub async fn put_items_raw(&self, items_xml: &str) -> VaultResult<Vec<ItemKey>> {
        let request = self.request("PutItems", 2).with_body(items_xml);
        let response = self.execute(request).await?;
        let body = response.body.as_deref().unwrap_or_default();
        Ok(parse_item_keys(body)?)
    }

    /// Deletes items by key. Version-stamped keys are rejected by the
    /// service with a version-mismatch status when stale.
    pub async fn remove_items(&self, keys: &[ItemKey]) -> VaultResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let request = self.request("RemoveItems", 1).with_body(keys_to_body_xml(keys)?);
        self.execute(request).await?;
        Ok(())
    }

    /// Which access the app holds on this record for each item type.
    pub async fn query_permissions(&self, type_ids: &[Uuid]) -> VaultResult<Vec<TypePermission>> {
        let mut body = String::new();
        for type_id in type_ids {
            body.push_str(&format!("<type-id>{type_id}</type-id>"));
        }
        let request = self.request("QueryPermissions", 1).with_body(body);
        let response = self.execute(request).await?;

        let raw: RawPermissions = response.decode()?;
        Ok(raw.permissions)
    }

    /// Revokes this app instance's authorization on the record.
    pub async fn remove_authorization(&self) -> VaultResult<()> {
        let request = self.request("RemoveApplicationRecordAuthorization", 1);
        self.execute(request).await?;
        Ok(())
    }

    /// Opens a blob upload and returns its staging ticket.
    pub async fn begin_put_blob(&self) -> VaultResult<BlobPutTicket> {
        let request = self.request("BeginPutBlob", 1);
        let response = self.execute(request).await?;
        Ok(response.decode()?)
    }

    /// Uploads a whole blob: opens a ticket, checks the size cap, streams
    /// the chunks, and returns the blob reference URL for the item payload
    /// that will point at it.
    pub async fn upload_blob(&self, payload: Bytes, content_type: &str) -> VaultResult<String> {
        let ticket = self.begin_put_blob().await?;
        if ticket.max_blob_size > 0 && payload.len() as u64 > ticket.max_blob_size {
            return Err(ClientError::PayloadTooLarge {
                size: payload.len() as u64,
                max: ticket.max_blob_size,
            }
            .into());
        }

        debug!(
            bytes = payload.len(),
            chunk_size = ticket.chunk_size,
            "uploading blob"
        );
        self.client
            .blob_streamer()
            .upload(&ticket, payload, content_type, &self.cancel)
            .await
            .map_err(map_blob_error)?;
        Ok(ticket.blob_ref_url)
    }

    /// Fetches blob content from a reference URL.
    pub async fn download_blob(&self, url: &Url) -> VaultResult<Bytes> {
        self.client
            .blob_streamer()
            .download(url, &self.cancel)
            .await
            .map_err(map_blob_error)
    }
}

fn map_blob_error(err: TransportError) -> VaultError {
    match err {
        TransportError::Cancelled => VaultError::Cancelled,
        other => VaultError::Transport(other),
    }
}

#[derive(Debug, Deserialize)]
struct RawPermissions {
    #[serde(rename = "item-type-permission", default)]
    permissions: Vec<TypePermission>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vaultlink_wire::Response;

    #[test]
    fn permissions_decode() {
        let raw = "<response><status><code>0</code></status><info>\
                   <item-type-permission>\
                   <type-id>30cafccc-047d-4288-94ef-643571f7919d</type-id>\
                   <online-access>Read,Write</online-access>\
                   <offline-access>Read</offline-access>\
                   </item-type-permission>\
                   </info></response>";
        let decoded: RawPermissions = Response::parse(raw).unwrap().decode().unwrap();
        assert_eq!(decoded.permissions.len(), 1);
        assert_eq!(decoded.permissions[0].online_access, "Read,Write");
        assert_eq!(decoded.permissions[0].offline_access, "Read");
    }
}
