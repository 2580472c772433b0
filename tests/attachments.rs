//! Attachment pipeline tests
//!
//! Upload and download through an in-memory CDN double, verifying the
//! pointer round trip, the digest-before-decrypt guard and the size limit.

use std::sync::Mutex;

use async_trait::async_trait;
use hashbrown::HashMap;

use cachet::{
    download_attachment, upload_attachment, AttachmentConfig, AttachmentError, AttachmentGateway,
    AttachmentUpload, RemoteId, UploadDestination,
};

// ----------------------------------------------------------------------------
// CDN Double
// ----------------------------------------------------------------------------

#[derive(Default)]
struct MemoryCdn {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    next_id: Mutex<u64>,
    v3: bool,
    corrupt_downloads: bool,
}

impl MemoryCdn {
    fn v2() -> Self {
        Self::default()
    }

    fn v3() -> Self {
        Self {
            v3: true,
            ..Self::default()
        }
    }

    fn corrupting() -> Self {
        Self {
            corrupt_downloads: true,
            ..Self::default()
        }
    }

    fn slot(destination: &UploadDestination) -> String {
        match destination {
            UploadDestination::V2 { id } => format!("v2:{id}"),
            UploadDestination::V3 { cdn_key, .. } => format!("v3:{cdn_key}"),
        }
    }
}

#[async_trait]
impl AttachmentGateway for MemoryCdn {
    async fn allocate(&self) -> Result<UploadDestination, AttachmentError> {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        Ok(if self.v3 {
            UploadDestination::V3 {
                cdn_number: 2,
                cdn_key: format!("key-{next}"),
                resumable_url: format!("https://cdn.test/resume/{next}"),
            }
        } else {
            UploadDestination::V2 { id: *next }
        })
    }

    async fn upload(
        &self,
        destination: &UploadDestination,
        ciphertext: &[u8],
    ) -> Result<(), AttachmentError> {
        self.blobs
            .lock()
            .unwrap()
            .insert(Self::slot(destination), ciphertext.to_vec());
        Ok(())
    }

    async fn download(
        &self,
        _cdn_number: u32,
        remote_id: &RemoteId,
    ) -> Result<Vec<u8>, AttachmentError> {
        let slot = match remote_id {
            RemoteId::Numeric(id) => format!("v2:{id}"),
            RemoteId::Key(key) => format!("v3:{key}"),
        };
        let mut blob = self
            .blobs
            .lock()
            .unwrap()
            .get(&slot)
            .cloned()
            .ok_or_else(|| AttachmentError::Transfer("not found".into()))?;
        if self.corrupt_downloads {
            let last = blob.len() - 1;
            blob[last] ^= 0x80;
        }
        Ok(blob)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_upload_download_round_trip_v2() {
    let cdn = MemoryCdn::v2();
    let data = b"a voice note".to_vec();

    let pointer = upload_attachment(
        &cdn,
        AttachmentUpload {
            data: data.clone(),
            content_type: Some("audio/aac".into()),
            voice_note: true,
            ..Default::default()
        },
        &AttachmentConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(pointer.cdn_number, 0);
    assert!(matches!(pointer.remote_id, Some(RemoteId::Numeric(_))));
    assert_eq!(pointer.size, Some(data.len() as u32));
    assert!(pointer.voice_note());
    assert!(!pointer.gif());

    let downloaded = download_attachment(&cdn, &pointer).await.unwrap();
    assert_eq!(downloaded, data);
}

#[tokio::test]
async fn test_upload_download_round_trip_v3() {
    let cdn = MemoryCdn::v3();
    let data = vec![7u8; 10_000];

    let pointer = upload_attachment(
        &cdn,
        AttachmentUpload {
            data: data.clone(),
            content_type: Some("image/png".into()),
            width: Some(640),
            height: Some(480),
            ..Default::default()
        },
        &AttachmentConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(pointer.cdn_number, 2);
    assert!(matches!(pointer.remote_id, Some(RemoteId::Key(_))));

    let downloaded = download_attachment(&cdn, &pointer).await.unwrap();
    assert_eq!(downloaded, data);
}

#[tokio::test]
async fn test_corrupted_blob_fails_integrity_check() {
    let cdn = MemoryCdn::corrupting();

    let pointer = upload_attachment(
        &cdn,
        AttachmentUpload {
            data: b"tamper with me".to_vec(),
            ..Default::default()
        },
        &AttachmentConfig::default(),
    )
    .await
    .unwrap();

    assert!(matches!(
        download_attachment(&cdn, &pointer).await,
        Err(AttachmentError::IntegrityFailure)
    ));
}

#[tokio::test]
async fn test_oversized_upload_rejected() {
    let cdn = MemoryCdn::v2();
    let config = AttachmentConfig {
        max_upload_size: 1024,
    };

    let result = upload_attachment(
        &cdn,
        AttachmentUpload {
            data: vec![0u8; 2048],
            ..Default::default()
        },
        &config,
    )
    .await;

    assert!(matches!(result, Err(AttachmentError::TooLarge { .. })));
    assert!(cdn.blobs.lock().unwrap().is_empty());
}
