//! Settlement submitter boundary. The chain client and signing key
//! are explicit construction-time configuration, never process-wide
//! singletons, so the reconciler can run against a fake in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use starknet_accounts::{Account, ExecutionEncoding, SingleOwnerAccount};
use starknet_core::types::{
    BlockId, BlockTag, Call, ExecutionResult, Felt, TransactionFinalityStatus,
};
use starknet_core::utils::get_selector_from_name;
use starknet_providers::jsonrpc::{HttpTransport, JsonRpcClient};
use starknet_providers::Provider;
use starknet_signers::{LocalWallet, SigningKey};
use tokio::time::{sleep, Duration, Instant};
use url::Url;

use crate::{
    config::Config,
    error::{AppError, Result},
};

const RECEIPT_POLL_INTERVAL_MS: u64 = 1_500;

/// Who the escrow pays out to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementPayout {
    Winner(String),
    /// Escrow splits the wager back to both players.
    Draw,
}

#[derive(Debug, Clone)]
pub struct PendingSettlement {
    pub tx_hash: String,
}

#[derive(Debug, Clone)]
pub struct ConfirmedSettlement {
    pub tx_hash: String,
    pub confirmed_at: DateTime<Utc>,
}

#[async_trait]
pub trait SettlementSubmitter: Send + Sync {
    /// Submits the admin-authorized settlement call for the escrow
    /// identified by `invite_code`. Idempotency across retries is the
    /// escrow contract's concern; at-most-once concurrent submission
    /// per session is the reconciler's.
    async fn submit(
        &self,
        invite_code: &str,
        payout: &SettlementPayout,
    ) -> Result<PendingSettlement>;

    /// Awaits on-chain confirmation. Timing out or a revert is a
    /// `SubmitterFailure`; the caller releases its claim and the next
    /// sweep retries.
    async fn await_confirmation(
        &self,
        pending: &PendingSettlement,
        timeout: Duration,
    ) -> Result<ConfirmedSettlement>;
}

pub struct StarknetSubmitter {
    account: SingleOwnerAccount<JsonRpcClient<HttpTransport>, LocalWallet>,
    provider: JsonRpcClient<HttpTransport>,
    escrow_contract: Felt,
}

impl StarknetSubmitter {
    /// Callers gate on `Config::has_settlement_signer` first;
    /// constructing without a signer is a configuration error.
    pub fn from_config(config: &Config) -> Result<Self> {
        let (Some(account_address), Some(private_key)) = (
            config.settlement_account_address.as_deref(),
            config.settlement_private_key.as_deref(),
        ) else {
            return Err(AppError::Internal(
                "Settlement signer not configured".to_string(),
            ));
        };

        let rpc_url = Url::parse(&config.starknet_rpc_url)
            .map_err(|e| AppError::Internal(format!("Invalid RPC URL: {}", e)))?;
        let provider = JsonRpcClient::new(HttpTransport::new(rpc_url.clone()));

        let signer =
            LocalWallet::from_signing_key(SigningKey::from_secret_scalar(parse_felt(private_key)?));
        let chain_id = parse_chain_id(&config.starknet_chain_id)?;

        let mut account = SingleOwnerAccount::new(
            JsonRpcClient::new(HttpTransport::new(rpc_url)),
            signer,
            parse_felt(account_address)?,
            chain_id,
            ExecutionEncoding::New,
        );
        // Some public RPC providers don't support "pre_confirmed" yet.
        account.set_block_id(BlockId::Tag(BlockTag::Latest));

        Ok(Self {
            account,
            provider,
            escrow_contract: parse_felt(&config.escrow_contract_address)?,
        })
    }

    fn settlement_call(&self, invite_code: &str, payout: &SettlementPayout) -> Result<Call> {
        let code = invite_code_to_felt(invite_code)?;
        let (entrypoint, calldata) = match payout {
            SettlementPayout::Winner(address) => {
                ("declare_winner", vec![code, parse_felt(address)?])
            }
            SettlementPayout::Draw => ("declare_draw", vec![code]),
        };
        let selector = get_selector_from_name(entrypoint)
            .map_err(|e| AppError::Internal(format!("Selector error: {}", e)))?;
        Ok(Call {
            to: self.escrow_contract,
            selector,
            calldata,
        })
    }
}

#[async_trait]
impl SettlementSubmitter for StarknetSubmitter {
    async fn submit(
        &self,
        invite_code: &str,
        payout: &SettlementPayout,
    ) -> Result<PendingSettlement> {
        let call = self.settlement_call(invite_code, payout)?;
        let result = self
            .account
            .execute_v3(vec![call])
            .send()
            .await
            .map_err(|e| AppError::SubmitterFailure(e.to_string()))?;

        Ok(PendingSettlement {
            tx_hash: format!("{:#x}", result.transaction_hash),
        })
    }

    async fn await_confirmation(
        &self,
        pending: &PendingSettlement,
        timeout: Duration,
    ) -> Result<ConfirmedSettlement> {
        let tx_hash = parse_felt(&pending.tx_hash)?;
        let deadline = Instant::now() + timeout;
        let mut last_error = "transaction not yet confirmed".to_string();

        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(receipt) => {
                    if let ExecutionResult::Reverted { reason } = receipt.receipt.execution_result()
                    {
                        return Err(AppError::SubmitterFailure(format!(
                            "Settlement transaction reverted: {}",
                            reason
                        )));
                    }
                    if !matches!(
                        receipt.receipt.finality_status(),
                        TransactionFinalityStatus::PreConfirmed
                    ) {
                        return Ok(ConfirmedSettlement {
                            tx_hash: pending.tx_hash.clone(),
                            confirmed_at: Utc::now(),
                        });
                    }
                    last_error = "transaction still pre-confirmed".to_string();
                }
                Err(e) => last_error = e.to_string(),
            }

            if Instant::now() + Duration::from_millis(RECEIPT_POLL_INTERVAL_MS) > deadline {
                return Err(AppError::SubmitterFailure(format!(
                    "Confirmation timed out: {}",
                    last_error
                )));
            }
            sleep(Duration::from_millis(RECEIPT_POLL_INTERVAL_MS)).await;
        }
    }
}

/// Invite codes are stored as bare hex at the width the escrow
/// expects; the felt conversion is lossless by construction.
fn invite_code_to_felt(invite_code: &str) -> Result<Felt> {
    parse_felt(&format!("0x{}", invite_code.trim()))
        .map_err(|_| AppError::Internal(format!("Invalid invite code: {}", invite_code)))
}

pub fn parse_felt(value: &str) -> Result<Felt> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Internal("Empty field element".to_string()));
    }
    if trimmed.starts_with("0x") {
        return Felt::from_hex(trimmed)
            .map_err(|e| AppError::Internal(format!("Invalid felt hex: {}", e)));
    }
    Felt::from_dec_str(trimmed)
        .map_err(|e| AppError::Internal(format!("Invalid felt dec: {}", e)))
}

pub fn parse_chain_id(chain_id: &str) -> Result<Felt> {
    if chain_id.starts_with("0x") {
        return parse_felt(chain_id);
    }
    let hex = hex::encode(chain_id.as_bytes());
    parse_felt(&format!("0x{hex}"))
}
