//! Attachment pipeline
//!
//! Attachments travel out of band: the blob is padded, encrypted and pushed
//! to a CDN, and only a small pointer rides inside the message. Plaintext
//! sizes are obscured by rounding up to exponential buckets, and the
//! ciphertext digest recorded in the pointer is verified before any
//! decryption output is surfaced.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::AttachmentConfig;
use crate::content::{AttachmentPointer, RemoteId};
use crate::errors::AttachmentError;
use crate::proto::messages::{
    ATTACHMENT_FLAG_BORDERLESS, ATTACHMENT_FLAG_GIF, ATTACHMENT_FLAG_VOICE_MESSAGE,
};
use crate::types::Timestamp;

/// Key bytes for the blob cipher
pub const ATTACHMENT_KEY_SIZE: usize = 32;
/// Nonce prepended to the ciphertext
const NONCE_SIZE: usize = 12;
/// Smallest padded size; short blobs are indistinguishable below this
const MIN_PADDED_SIZE: u64 = 541;
/// Bucket growth factor
const PADDING_FACTOR: f64 = 1.05;

// ----------------------------------------------------------------------------
// Padding
// ----------------------------------------------------------------------------

/// Round a plaintext length up to its padding bucket. Buckets grow by five
/// percent so a ciphertext length reveals only a coarse size class.
pub fn padded_length(len: u64) -> u64 {
    let exponent = ((len as f64).ln() / PADDING_FACTOR.ln()).ceil();
    let bucket = PADDING_FACTOR.powf(exponent).floor() as u64;
    bucket.max(MIN_PADDED_SIZE)
}

fn pad(plaintext: &[u8]) -> Vec<u8> {
    let target = padded_length(plaintext.len() as u64) as usize;
    let mut padded = Vec::with_capacity(target);
    padded.extend_from_slice(plaintext);
    padded.resize(target, 0);
    padded
}

// ----------------------------------------------------------------------------
// Blob Cipher
// ----------------------------------------------------------------------------

/// Output of encrypting a blob for upload
#[derive(Debug, Clone)]
pub struct EncryptedAttachment {
    /// Nonce followed by the AEAD ciphertext
    pub ciphertext: Vec<u8>,
    pub key: Vec<u8>,
    /// SHA-256 over the full ciphertext
    pub digest: Vec<u8>,
}

/// Pad and encrypt a blob under a fresh random key
pub fn encrypt_attachment(plaintext: &[u8]) -> Result<EncryptedAttachment, AttachmentError> {
    let mut key = vec![0u8; ATTACHMENT_KEY_SIZE];
    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| AttachmentError::EncryptionFailed)?;
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), pad(plaintext).as_ref())
        .map_err(|_| AttachmentError::EncryptionFailed)?;

    let mut ciphertext = Vec::with_capacity(NONCE_SIZE + sealed.len());
    ciphertext.extend_from_slice(&nonce);
    ciphertext.extend_from_slice(&sealed);

    let digest = Sha256::digest(&ciphertext).to_vec();

    Ok(EncryptedAttachment {
        ciphertext,
        key,
        digest,
    })
}

/// Verify the ciphertext digest, then decrypt and strip padding. The digest
/// check runs before decryption so a tampered blob never produces plaintext.
pub fn decrypt_attachment(
    ciphertext: &[u8],
    key: &[u8],
    expected_digest: &[u8],
    plaintext_len: Option<usize>,
) -> Result<Vec<u8>, AttachmentError> {
    let digest = Sha256::digest(ciphertext);
    if digest.as_slice() != expected_digest {
        return Err(AttachmentError::IntegrityFailure);
    }

    if ciphertext.len() < NONCE_SIZE {
        return Err(AttachmentError::DecryptionFailed);
    }
    let (nonce, sealed) = ciphertext.split_at(NONCE_SIZE);

    let cipher =
        Aes256Gcm::new_from_slice(key).map_err(|_| AttachmentError::DecryptionFailed)?;
    let mut plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| AttachmentError::DecryptionFailed)?;

    if let Some(len) = plaintext_len {
        if len > plaintext.len() {
            return Err(AttachmentError::DecryptionFailed);
        }
        plaintext.truncate(len);
    }
    Ok(plaintext)
}

// ----------------------------------------------------------------------------
// Upload Gateway
// ----------------------------------------------------------------------------

/// Where an allocated upload goes. The older allocation style hands back a
/// numeric id on the default CDN; the newer one hands back an opaque key,
/// a CDN selector and a resumable upload URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadDestination {
    V2 {
        id: u64,
    },
    V3 {
        cdn_number: u32,
        cdn_key: String,
        resumable_url: String,
    },
}

impl UploadDestination {
    fn remote_id(&self) -> RemoteId {
        match self {
            UploadDestination::V2 { id } => RemoteId::Numeric(*id),
            UploadDestination::V3 { cdn_key, .. } => RemoteId::Key(cdn_key.clone()),
        }
    }

    fn cdn_number(&self) -> u32 {
        match self {
            UploadDestination::V2 { .. } => 0,
            UploadDestination::V3 { cdn_number, .. } => *cdn_number,
        }
    }
}

/// CDN operations. Implementations handle transfer, resumption and
/// authentication; this layer handles the cryptography around them.
#[async_trait]
pub trait AttachmentGateway: Send + Sync {
    /// Reserve an upload slot
    async fn allocate(&self) -> Result<UploadDestination, AttachmentError>;

    /// Push ciphertext into a reserved slot
    async fn upload(
        &self,
        destination: &UploadDestination,
        ciphertext: &[u8],
    ) -> Result<(), AttachmentError>;

    /// Fetch ciphertext by its location
    async fn download(
        &self,
        cdn_number: u32,
        remote_id: &RemoteId,
    ) -> Result<Vec<u8>, AttachmentError>;
}

/// A local blob queued for upload, with the presentation fields that end up
/// on the pointer.
#[derive(Debug, Clone, Default)]
pub struct AttachmentUpload {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    pub caption: Option<String>,
    pub blur_hash: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub voice_note: bool,
    pub borderless: bool,
    pub gif: bool,
    pub preview: Option<Vec<u8>>,
}

impl AttachmentUpload {
    fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.voice_note {
            flags |= ATTACHMENT_FLAG_VOICE_MESSAGE;
        }
        if self.borderless {
            flags |= ATTACHMENT_FLAG_BORDERLESS;
        }
        if self.gif {
            flags |= ATTACHMENT_FLAG_GIF;
        }
        flags
    }
}

/// Encrypt a blob, push it to the CDN and build the pointer recipients use
/// to fetch it.
pub async fn upload_attachment(
    gateway: &dyn AttachmentGateway,
    upload: AttachmentUpload,
    config: &AttachmentConfig,
) -> Result<AttachmentPointer, AttachmentError> {
    if upload.data.len() as u64 > config.max_upload_size {
        return Err(AttachmentError::TooLarge {
            size: upload.data.len() as u64,
            max: config.max_upload_size,
        });
    }

    let encrypted = encrypt_attachment(&upload.data)?;
    let destination = gateway.allocate().await?;
    gateway.upload(&destination, &encrypted.ciphertext).await?;

    debug!(
        size = upload.data.len(),
        ciphertext_size = encrypted.ciphertext.len(),
        cdn = destination.cdn_number(),
        digest = %hex::encode(&encrypted.digest),
        "uploaded attachment"
    );

    let flags = upload.flags();
    Ok(AttachmentPointer {
        cdn_number: destination.cdn_number(),
        remote_id: Some(destination.remote_id()),
        content_type: upload.content_type,
        key: encrypted.key,
        size: Some(upload.data.len() as u32),
        digest: encrypted.digest,
        file_name: upload.file_name,
        flags,
        width: upload.width,
        height: upload.height,
        caption: upload.caption,
        blur_hash: upload.blur_hash,
        upload_timestamp: Timestamp::now().as_millis(),
        preview: upload.preview,
    })
}

/// Fetch and decrypt the blob a pointer refers to
pub async fn download_attachment(
    gateway: &dyn AttachmentGateway,
    pointer: &AttachmentPointer,
) -> Result<Vec<u8>, AttachmentError> {
    let remote_id = pointer
        .remote_id
        .as_ref()
        .ok_or_else(|| AttachmentError::Transfer("pointer has no remote id".into()))?;
    let ciphertext = gateway.download(pointer.cdn_number, remote_id).await?;
    decrypt_attachment(
        &ciphertext,
        &pointer.key,
        &pointer.digest,
        pointer.size.map(|s| s as usize),
    )
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
