// src/services/request_manager.rs
//! Credential request lifecycle.
//!
//! ```text
//! pending --approve--> approved   (terminal)
//!    \----deny-------> denied     (terminal)
//! ```
//!
//! Only the student named in a request may resolve it. Lookups always filter
//! by id *and* the caller's wallet column, so "does not exist" and "not yours"
//! are indistinguishable (`RequestNotFound`) to the caller.

use chrono::Utc;
use log::{info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::request::{
    CredentialRequest, RequestStatus, RequestView, Resolution, ResponseAction, WalletRole,
};
use crate::storage::RecordStore;
use crate::utils::config::DEFAULT_EXPIRY_MINUTES;
use crate::utils::crypto::require_wallet;

/// Create/approve/deny/read operations over [`CredentialRequest`]s.
#[derive(Clone)]
pub struct RequestManager {
    records: Arc<dyn RecordStore>,
    default_expiry_minutes: i64,
}

impl RequestManager {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self {
            records,
            default_expiry_minutes: DEFAULT_EXPIRY_MINUTES,
        }
    }

    /// Overrides the expiry applied when `create` is called without one.
    pub fn with_default_expiry(mut self, minutes: i64) -> Self {
        self.default_expiry_minutes = minutes;
        self
    }

    /// Opens a pending request from `recipient_wallet` to `student_wallet`.
    ///
    /// # Errors
    /// - `InsufficientData` if either wallet is empty
    /// - `InvalidData` if a wallet is not an address, or `expiry_minutes` is
    ///   not positive or puts the expiry beyond the representable range
    pub async fn create(
        &self,
        student_wallet: &str,
        recipient_wallet: &str,
        expiry_minutes: Option<i64>,
    ) -> Result<CredentialRequest, ApiError> {
        let student = require_wallet(student_wallet, ApiError::InsufficientData)?;
        let recipient = require_wallet(recipient_wallet, ApiError::InsufficientData)?;

        let minutes = expiry_minutes.unwrap_or(self.default_expiry_minutes);
        if minutes <= 0 {
            return Err(ApiError::InvalidData);
        }

        let request = CredentialRequest::new_pending(student, recipient, Utc::now(), minutes)
            .ok_or(ApiError::InvalidData)?;
        self.records.insert_request(&request).await?;
        info!(
            "request {} created by {} for {}",
            request.id, request.recipient_wallet, request.student_wallet
        );
        Ok(request)
    }

    /// Grants the request's recipient access to `transcript_ids`.
    ///
    /// Every transcript must exist and belong to `acting_wallet`. All ids are
    /// checked before anything is written, so a rejected approval leaves the
    /// request pending with no link rows. Duplicate ids are collapsed,
    /// keeping first occurrence order.
    ///
    /// # Errors
    /// - `RequestNotFound` if no request with this id names `acting_wallet` as student
    /// - `RequestNotPending` if the request was already resolved
    /// - `InsufficientData` if `transcript_ids` is empty
    /// - `UnauthorizedTranscript` if any transcript is missing or owned by someone else
    pub async fn approve(
        &self,
        request_id: Uuid,
        acting_wallet: &str,
        transcript_ids: &[String],
    ) -> Result<CredentialRequest, ApiError> {
        let acting = require_wallet(acting_wallet, ApiError::InsufficientData)?;
        self.pending_for_student(request_id, &acting).await?;

        let mut seen = HashSet::new();
        let transcript_ids: Vec<String> = transcript_ids
            .iter()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && seen.insert(id.clone()))
            .collect();
        if transcript_ids.is_empty() {
            return Err(ApiError::InsufficientData);
        }

        for transcript_id in &transcript_ids {
            match self.records.find_transcript(transcript_id).await? {
                Some(transcript) if transcript.owner_wallet == acting => {}
                _ => {
                    warn!(
                        "{} tried to grant transcript {} it does not own",
                        acting, transcript_id
                    );
                    return Err(ApiError::UnauthorizedTranscript);
                }
            }
        }

        self.resolve(request_id, Resolution::Approve { transcript_ids })
            .await
    }

    /// Refuses the request, optionally recording why.
    ///
    /// # Errors
    /// - `RequestNotFound` if no request with this id names `acting_wallet` as student
    /// - `RequestNotPending` if the request was already resolved
    pub async fn deny(
        &self,
        request_id: Uuid,
        acting_wallet: &str,
        reason: Option<String>,
    ) -> Result<CredentialRequest, ApiError> {
        let acting = require_wallet(acting_wallet, ApiError::InsufficientData)?;
        self.pending_for_student(request_id, &acting).await?;

        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty());
        self.resolve(request_id, Resolution::Deny { reason }).await
    }

    /// Applies a student's API answer: `accept` approves with
    /// `transcript_list`, `reject` denies with `reason`.
    pub async fn respond(
        &self,
        request_id: Uuid,
        acting_wallet: &str,
        response: ResponseAction,
        transcript_list: Option<Vec<String>>,
        reason: Option<String>,
    ) -> Result<CredentialRequest, ApiError> {
        match response {
            ResponseAction::Accept => {
                let ids = transcript_list.unwrap_or_default();
                self.approve(request_id, acting_wallet, &ids).await
            }
            ResponseAction::Reject => self.deny(request_id, acting_wallet, reason).await,
        }
    }

    /// Reads one request the caller is a party to in the claimed `role`.
    pub async fn get(
        &self,
        request_id: Uuid,
        caller_wallet: &str,
        role: WalletRole,
    ) -> Result<RequestView, ApiError> {
        let caller = require_wallet(caller_wallet, ApiError::InsufficientData)?;
        let request = self
            .records
            .find_request(request_id, role, &caller)
            .await?
            .ok_or(ApiError::RequestNotFound)?;
        Ok(RequestView::from(&request))
    }

    /// Every request the caller is a party to in `role`, oldest first.
    pub async fn list(
        &self,
        caller_wallet: &str,
        role: WalletRole,
    ) -> Result<Vec<RequestView>, ApiError> {
        let caller = require_wallet(caller_wallet, ApiError::InsufficientData)?;
        let requests = self.records.list_requests(role, &caller).await?;
        Ok(requests.iter().map(RequestView::from).collect())
    }

    /// Approved requests that have not yet passed their expiry.
    ///
    /// Expiry is only applied here, at read time; it never changes a status.
    pub async fn list_active(
        &self,
        caller_wallet: &str,
        role: WalletRole,
    ) -> Result<Vec<RequestView>, ApiError> {
        let caller = require_wallet(caller_wallet, ApiError::InsufficientData)?;
        let now = Utc::now();
        let requests = self.records.list_requests(role, &caller).await?;
        Ok(requests
            .iter()
            .filter(|r| r.is_active(now))
            .map(RequestView::from)
            .collect())
    }

    async fn pending_for_student(
        &self,
        request_id: Uuid,
        student: &str,
    ) -> Result<CredentialRequest, ApiError> {
        let request = self
            .records
            .find_request(request_id, WalletRole::StudentWallet, student)
            .await?
            .ok_or(ApiError::RequestNotFound)?;
        if request.status != RequestStatus::Pending {
            return Err(ApiError::RequestNotPending);
        }
        Ok(request)
    }

    async fn resolve(
        &self,
        request_id: Uuid,
        resolution: Resolution,
    ) -> Result<CredentialRequest, ApiError> {
        let resolved = self
            .records
            .resolve_request(request_id, &resolution, Utc::now())
            .await?
            .ok_or(ApiError::RequestNotPending)?;
        info!("request {} is now {}", resolved.id, resolved.status);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transcript::Transcript;
    use crate::storage::MemoryRecordStore;

    const STUDENT: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const RECIPIENT: &str = "0x2222222222222222222222222222222222222222";
    const OTHER: &str = "0x3333333333333333333333333333333333333333";

    fn transcript(id: &str, owner: &str) -> Transcript {
        Transcript {
            transcript_id: id.into(),
            ipfs_uri_metadata: format!("ipfs://meta-{id}"),
            ipfs_uri_media_hash: format!("ipfs://media-{id}"),
            owner_wallet: owner.into(),
        }
    }

    async fn setup() -> (RequestManager, Arc<MemoryRecordStore>) {
        let store = Arc::new(MemoryRecordStore::new());
        store.insert_transcript(&transcript("A", STUDENT)).await.unwrap();
        store.insert_transcript(&transcript("B", OTHER)).await.unwrap();
        store.insert_transcript(&transcript("C", STUDENT)).await.unwrap();
        (RequestManager::new(store.clone()), store)
    }

    fn ids(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn create_defaults_to_seven_days() {
        let (manager, _) = setup().await;
        let request = manager.create(STUDENT, RECIPIENT, None).await.unwrap();

        assert_eq!(request.status, RequestStatus::Pending);
        assert_eq!(
            request.expiry_timestamp - request.created_at,
            chrono::Duration::days(7)
        );
    }

    #[tokio::test]
    async fn create_validates_input() {
        let (manager, _) = setup().await;
        assert_eq!(
            manager.create("", RECIPIENT, Some(60)).await,
            Err(ApiError::InsufficientData)
        );
        assert_eq!(
            manager.create(STUDENT, RECIPIENT, Some(0)).await,
            Err(ApiError::InvalidData)
        );
        assert_eq!(
            manager.create(STUDENT, RECIPIENT, Some(-5)).await,
            Err(ApiError::InvalidData)
        );
    }

    #[tokio::test]
    async fn create_rejects_unrepresentable_expiry() {
        let (manager, _) = setup().await;
        for minutes in [i64::MAX, 1_000_000_000_000] {
            assert_eq!(
                manager.create(STUDENT, RECIPIENT, Some(minutes)).await,
                Err(ApiError::InvalidData)
            );
        }
        assert!(manager
            .list(STUDENT, WalletRole::StudentWallet)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn create_rejects_non_address_wallets() {
        let (manager, _) = setup().await;
        assert_eq!(
            manager.create("0xaaaa", RECIPIENT, Some(60)).await,
            Err(ApiError::InvalidData)
        );
    }

    #[tokio::test]
    async fn approve_grants_owned_transcripts() {
        let (manager, store) = setup().await;
        let request = manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();

        let approved = manager
            .approve(request.id, STUDENT, &ids(&["A", "C", "A"]))
            .await
            .unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);
        assert_eq!(approved.transcript_list, ids(&["A", "C"]));
        assert!(approved.updated_at >= request.updated_at);
        assert_eq!(store.request_links(request.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn approval_is_all_or_nothing() {
        let (manager, store) = setup().await;
        let request = manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();

        assert_eq!(
            manager.approve(request.id, STUDENT, &ids(&["A", "B"])).await,
            Err(ApiError::UnauthorizedTranscript)
        );
        let view = manager
            .get(request.id, STUDENT, WalletRole::StudentWallet)
            .await
            .unwrap();
        assert_eq!(view.status, RequestStatus::Pending);
        assert!(store.request_links(request.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn approving_unknown_transcript_is_unauthorized() {
        let (manager, _) = setup().await;
        let request = manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();
        assert_eq!(
            manager.approve(request.id, STUDENT, &ids(&["missing"])).await,
            Err(ApiError::UnauthorizedTranscript)
        );
    }

    #[tokio::test]
    async fn approve_requires_transcripts() {
        let (manager, _) = setup().await;
        let request = manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();
        assert_eq!(
            manager.approve(request.id, STUDENT, &[]).await,
            Err(ApiError::InsufficientData)
        );
    }

    #[tokio::test]
    async fn only_the_named_student_can_act() {
        let (manager, _) = setup().await;
        let request = manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();

        assert_eq!(
            manager.approve(request.id, RECIPIENT, &ids(&["A"])).await,
            Err(ApiError::RequestNotFound)
        );
        assert_eq!(
            manager.deny(request.id, OTHER, None).await,
            Err(ApiError::RequestNotFound)
        );
        // Indistinguishable from a request that does not exist.
        assert_eq!(
            manager.deny(Uuid::new_v4(), STUDENT, None).await,
            Err(ApiError::RequestNotFound)
        );
    }

    #[tokio::test]
    async fn resolved_requests_are_terminal() {
        let (manager, _) = setup().await;

        let approved = manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();
        manager.approve(approved.id, STUDENT, &ids(&["A"])).await.unwrap();
        assert_eq!(
            manager.approve(approved.id, STUDENT, &ids(&["C"])).await,
            Err(ApiError::RequestNotPending)
        );
        assert_eq!(
            manager.deny(approved.id, STUDENT, None).await,
            Err(ApiError::RequestNotPending)
        );

        let denied = manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();
        manager.deny(denied.id, STUDENT, None).await.unwrap();
        assert_eq!(
            manager.approve(denied.id, STUDENT, &ids(&["A"])).await,
            Err(ApiError::RequestNotPending)
        );
        assert_eq!(
            manager.deny(denied.id, STUDENT, Some("again".into())).await,
            Err(ApiError::RequestNotPending)
        );
    }

    #[tokio::test]
    async fn deny_records_reason() {
        let (manager, _) = setup().await;
        let request = manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();

        let denied = manager
            .deny(request.id, STUDENT, Some("position filled".into()))
            .await
            .unwrap();
        assert_eq!(denied.status, RequestStatus::Denied);
        assert_eq!(denied.reason.as_deref(), Some("position filled"));
        assert!(denied.transcript_list.is_empty());

        let view = manager
            .get(request.id, RECIPIENT, WalletRole::RecipientWallet)
            .await
            .unwrap();
        assert_eq!(view.reason.as_deref(), Some("position filled"));
        assert!(view.transcripts.is_none());
    }

    #[tokio::test]
    async fn respond_dispatches_on_action() {
        let (manager, _) = setup().await;
        let accepted = manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();
        let rejected = manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();

        let approved = manager
            .respond(accepted.id, STUDENT, ResponseAction::Accept, Some(ids(&["C"])), None)
            .await
            .unwrap();
        assert_eq!(approved.status, RequestStatus::Approved);

        let denied = manager
            .respond(rejected.id, STUDENT, ResponseAction::Reject, None, Some("no".into()))
            .await
            .unwrap();
        assert_eq!(denied.status, RequestStatus::Denied);
        assert_eq!(denied.reason.as_deref(), Some("no"));
    }

    #[tokio::test]
    async fn accept_without_transcripts_is_insufficient() {
        let (manager, _) = setup().await;
        let request = manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();
        assert_eq!(
            manager
                .respond(request.id, STUDENT, ResponseAction::Accept, None, None)
                .await,
            Err(ApiError::InsufficientData)
        );
    }

    #[tokio::test]
    async fn get_uses_claimed_role() {
        let (manager, _) = setup().await;
        let request = manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();

        assert!(manager
            .get(request.id, RECIPIENT, WalletRole::RecipientWallet)
            .await
            .is_ok());
        assert_eq!(
            manager
                .get(request.id, RECIPIENT, WalletRole::StudentWallet)
                .await,
            Err(ApiError::RequestNotFound)
        );
    }

    #[tokio::test]
    async fn list_filters_by_role() {
        let (manager, _) = setup().await;
        let first = manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();
        let second = manager.create(STUDENT, OTHER, Some(60)).await.unwrap();

        let as_student = manager.list(STUDENT, WalletRole::StudentWallet).await.unwrap();
        let listed: Vec<Uuid> = as_student.iter().map(|v| v.request_id).collect();
        assert_eq!(listed, vec![first.id, second.id]);

        let as_recipient = manager
            .list(RECIPIENT, WalletRole::RecipientWallet)
            .await
            .unwrap();
        assert_eq!(as_recipient.len(), 1);
        assert!(manager
            .list(RECIPIENT, WalletRole::StudentWallet)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn list_active_skips_pending_and_expired() {
        let (manager, store) = setup().await;
        let live = manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();
        manager.approve(live.id, STUDENT, &ids(&["A"])).await.unwrap();
        manager.create(STUDENT, RECIPIENT, Some(60)).await.unwrap();

        // An approval whose expiry is already behind us stays approved but inactive.
        let mut stale =
            CredentialRequest::new_pending(STUDENT.into(), RECIPIENT.into(), Utc::now(), 1)
                .unwrap();
        stale.expiry_timestamp = stale.created_at - chrono::Duration::minutes(1);
        store.insert_request(&stale).await.unwrap();
        manager.approve(stale.id, STUDENT, &ids(&["C"])).await.unwrap();

        let active = manager
            .list_active(RECIPIENT, WalletRole::RecipientWallet)
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].request_id, live.id);
    }

    #[tokio::test]
    async fn wallets_are_case_insensitive() {
        let (manager, _) = setup().await;
        let request = manager
            .create(&STUDENT.to_uppercase(), RECIPIENT, Some(60))
            .await
            .unwrap();
        assert_eq!(request.student_wallet, STUDENT);
        let bare = manager
            .create(STUDENT.trim_start_matches("0x"), RECIPIENT, Some(60))
            .await
            .unwrap();
        assert_eq!(bare.student_wallet, STUDENT);
        assert!(manager.approve(request.id, STUDENT, &ids(&["A"])).await.is_ok());
    }
}
