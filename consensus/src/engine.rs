//! Staking consensus engine
//!
//! Every public operation is one serialized transaction. Block submission
//! applies all of its effects to a clone of the state, runs the answer
//! callbacks against that clone and only then swaps it in, so a failure at
//! any step leaves the engine exactly as it was.

use sibyl_core::{
    Address, Amount, Asset, BlockHash, ConsensusConfig, GovernanceParams, Hash, Hashable,
    ParameterSource, RequestId, SharedGovernance, SibylError, SibylResult, TxContext,
};
use sibyl_crypto::hashing::IncrementalHasher;
use sibyl_state::balances::ESCROW_ACCOUNT;
use sibyl_state::ledger::Block;
use sibyl_state::registry::{Request, RequestKind, RequestTerms};
use sibyl_state::stake::DivinerStake;
use sibyl_state::store::ConsensusState;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::callback::AnswerCallback;
use crate::message::BlockSubmission;
use crate::quorum::QuorumVerifier;
use crate::resolver::{apply_responses, deliver_answers};
use crate::reward::distribute;

/// Events emitted by the consensus engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusEvent {
    /// Request registered and its bounties escrowed
    RequestSubmitted(RequestId),
    /// Withdrawal pseudo-request prepared for a diviner
    WithdrawalRequested(RequestId, Address),
    /// Block accepted
    BlockCreated(BlockHash),
    /// Tokens released to a diviner by a withdrawal
    RewardWithdrawn(Address, Amount),
    /// Stake, activation or deactivation of a diviner
    StakeChanged(Address),
}

/// Consensus engine for SIBYL
pub struct StakingConsensus {
    config: ConsensusConfig,
    governance: SharedGovernance,
    state: ConsensusState,
    event_tx: Option<mpsc::Sender<ConsensusEvent>>,
}

impl StakingConsensus {
    pub fn new(config: ConsensusConfig, governance: SharedGovernance, state: ConsensusState) -> Self {
        Self {
            config,
            governance,
            state,
            event_tx: None,
        }
    }

    /// Set event channel
    pub fn set_event_channel(&mut self, tx: mpsc::Sender<ConsensusEvent>) {
        self.event_tx = Some(tx);
    }

    fn params(&self) -> GovernanceParams {
        self.governance.snapshot()
    }

    // ============ Requests ============

    /// Register a request; its bounties move from the sender into escrow
    pub fn submit_request(
        &mut self,
        ctx: &TxContext,
        id: RequestId,
        terms: RequestTerms,
    ) -> SibylResult<()> {
        if terms.kind.is_withdrawal() {
            return Err(SibylError::InvalidParameter(
                "withdrawals are prepared with withdraw_rewards_request".into(),
            ));
        }
        self.register_escrowed(ctx, id, terms)?;

        info!(
            "Request {} submitted by {} (token bounty {}, native bounty {})",
            id, ctx.sender, terms.token_bounty, terms.native_bounty
        );
        self.emit_event(ConsensusEvent::RequestSubmitted(id));
        Ok(())
    }

    /// Prepare a withdrawal for the sender, to be answered in a later block
    ///
    /// The amount actually released is the value the committee signs for the
    /// returned request id.
    pub fn withdraw_rewards_request(
        &mut self,
        ctx: &TxContext,
        token_bounty: Amount,
        mining_fee: Amount,
    ) -> SibylResult<RequestId> {
        if !self.state.stakes.is_diviner(&ctx.sender) {
            return Err(SibylError::NotADiviner(ctx.sender));
        }

        let nonce = self.state.withdrawal_nonce;
        let id = withdrawal_id(&ctx.sender, token_bounty, nonce);
        let terms = RequestTerms {
            token_bounty,
            native_bounty: mining_fee,
            min_deposit: Amount::ZERO,
            requester: ctx.sender,
            kind: RequestKind::Withdrawal {
                beneficiary: ctx.sender,
            },
        };
        self.register_escrowed(ctx, id, terms)?;
        self.state.withdrawal_nonce = nonce.saturating_add(1);

        info!("Withdrawal request {} prepared for {}", id, ctx.sender);
        self.emit_event(ConsensusEvent::WithdrawalRequested(id, ctx.sender));
        Ok(id)
    }

    fn register_escrowed(
        &mut self,
        ctx: &TxContext,
        id: RequestId,
        terms: RequestTerms,
    ) -> SibylResult<()> {
        if self.state.requests.contains(&id) {
            return Err(SibylError::DuplicateRequest(id));
        }
        terms.check_minimums(&self.params())?;

        // Check both balances up front so a short second asset debits nothing
        for (asset, amount) in [(Asset::Token, terms.token_bounty), (Asset::Native, terms.native_bounty)] {
            let available = self.state.balances.balance_of(asset, &ctx.sender);
            if amount > available {
                return Err(SibylError::insufficient(amount.0, available.0));
            }
        }

        self.state
            .balances
            .transfer(Asset::Token, ctx.sender, ESCROW_ACCOUNT, terms.token_bounty)?;
        self.state
            .balances
            .transfer(Asset::Native, ctx.sender, ESCROW_ACCOUNT, terms.native_bounty)?;
        self.state.requests.register(id, terms, ctx.timestamp)?;
        Ok(())
    }

    // ============ Blocks ============

    /// Verify, resolve and append a block; returns the new block hash
    pub fn submit_block(
        &mut self,
        ctx: &TxContext,
        submission: &BlockSubmission,
        callbacks: &mut dyn AnswerCallback,
    ) -> SibylResult<BlockHash> {
        match self.try_submit_block(ctx, submission, callbacks) {
            Ok(hash) => {
                callbacks.commit();
                Ok(hash)
            }
            Err(e) => {
                callbacks.rollback();
                warn!("Block from {} rejected: {}", ctx.sender, e);
                Err(e)
            }
        }
    }

    fn try_submit_block(
        &mut self,
        ctx: &TxContext,
        submission: &BlockSubmission,
        callbacks: &mut dyn AnswerCallback,
    ) -> SibylResult<BlockHash> {
        let latest = self.state.ledger.latest();
        if submission.previous != latest {
            return Err(SibylError::StalePrevious {
                expected: latest,
                got: submission.previous,
            });
        }
        if submission.request_ids.len() > self.config.max_requests_per_block {
            return Err(SibylError::InvalidParameter(format!(
                "block resolves {} requests, limit is {}",
                submission.request_ids.len(),
                self.config.max_requests_per_block
            )));
        }

        let params = self.params();
        let report = QuorumVerifier::new(params.quorum_pct())
            .verify_submission(submission, &self.state.stakes)?;
        debug!(
            "Quorum met: {} of {} active stake signed",
            report.signed, report.total
        );

        let block = Block {
            previous: submission.previous,
            height: submission.height,
            request_ids: submission.request_ids.clone(),
            response_data_hash: submission.response_data_hash,
            packed_responses: submission.packed_responses.clone(),
            creator: ctx.sender,
            signers: submission.signers.clone(),
            created_at: ctx.timestamp,
        };
        let block_hash = block.hash();

        // Effects, on a working copy
        let mut working = self.state.clone();
        let resolution = apply_responses(
            &mut working,
            &submission.request_ids,
            &submission.packed_responses,
            submission.height,
            block_hash,
            ctx.timestamp,
        )?;

        let distribution = distribute(
            resolution.reward,
            ctx.sender,
            &report,
            self.config.reward_policy,
            params.xy_block_producer_reward_pct,
        );
        for (account, amount) in &distribution.native {
            working
                .balances
                .transfer(Asset::Native, ESCROW_ACCOUNT, *account, *amount)?;
        }
        for (diviner, amount) in &distribution.token {
            working.stakes.accrue_reward(diviner, *amount)?;
        }

        let appended = working.ledger.append(block)?;
        debug_assert_eq!(appended, block_hash);

        // Interactions, against the finished working copy
        deliver_answers(&working, &resolution.answers, callbacks)?;

        self.state = working;

        info!(
            "Block {} accepted at height {} with {} requests, {} signers",
            block_hash,
            submission.height,
            submission.request_ids.len(),
            submission.signers.len()
        );
        for (diviner, amount) in resolution.withdrawals {
            self.emit_event(ConsensusEvent::RewardWithdrawn(diviner, amount));
        }
        self.emit_event(ConsensusEvent::BlockCreated(block_hash));
        Ok(block_hash)
    }

    /// Hash the diviners sign for `submission`
    pub fn message_hash(submission: &BlockSubmission) -> Hash {
        submission.message_hash()
    }

    // ============ Staking ============

    /// Bond tokens from the sender's balance
    pub fn stake(&mut self, ctx: &TxContext, amount: Amount) -> SibylResult<&DivinerStake> {
        if !self.state.stakes.is_diviner(&ctx.sender) {
            return Err(SibylError::NotADiviner(ctx.sender));
        }
        let available = self.state.balances.balance_of(Asset::Token, &ctx.sender);
        if amount > available {
            return Err(SibylError::insufficient(amount.0, available.0));
        }

        let cooldown = self.params().stake_cooldown_secs();
        self.state
            .stakes
            .stake(&ctx.sender, amount, ctx.timestamp, cooldown)?;
        self.state
            .balances
            .transfer(Asset::Token, ctx.sender, ESCROW_ACCOUNT, amount)?;

        info!("{} staked {}", ctx.sender, amount);
        self.emit_event(ConsensusEvent::StakeChanged(ctx.sender));
        self.state
            .stakes
            .get(&ctx.sender)
            .ok_or(SibylError::NotADiviner(ctx.sender))
    }

    pub fn activate(&mut self, ctx: &TxContext, amount: Amount) -> SibylResult<&DivinerStake> {
        self.state.stakes.activate(&ctx.sender, amount, ctx.timestamp)?;
        info!("{} activated {}", ctx.sender, amount);
        self.emit_event(ConsensusEvent::StakeChanged(ctx.sender));
        self.state
            .stakes
            .get(&ctx.sender)
            .ok_or(SibylError::NotADiviner(ctx.sender))
    }

    pub fn deactivate(&mut self, ctx: &TxContext, amount: Amount) -> SibylResult<&DivinerStake> {
        let cooldown = self.params().unstake_cooldown_secs();
        self.state
            .stakes
            .deactivate(&ctx.sender, amount, ctx.timestamp, cooldown)?;
        info!("{} deactivated {}", ctx.sender, amount);
        self.emit_event(ConsensusEvent::StakeChanged(ctx.sender));
        self.state
            .stakes
            .get(&ctx.sender)
            .ok_or(SibylError::NotADiviner(ctx.sender))
    }

    // ============ Balances ============

    /// Move the sender's funds; used by collaborators to settle payments
    pub fn transfer(
        &mut self,
        ctx: &TxContext,
        asset: Asset,
        to: Address,
        amount: Amount,
    ) -> SibylResult<()> {
        if ctx.sender == ESCROW_ACCOUNT {
            return Err(SibylError::InvalidParameter("escrow funds are not transferable".into()));
        }
        self.state.balances.transfer(asset, ctx.sender, to, amount)
    }

    pub fn balance(&self, asset: Asset, account: &Address) -> Amount {
        self.state.balances.balance_of(asset, account)
    }

    // ============ Queries ============

    /// Hash of the newest block, `Hash::ZERO` before the first
    pub fn latest_block(&self) -> BlockHash {
        self.state.ledger.latest()
    }

    pub fn block(&self, hash: &BlockHash) -> Option<&Block> {
        self.state.ledger.get(hash)
    }

    /// Block that answered `id`, or the zero-creator sentinel
    pub fn block_for_request(&self, id: &RequestId) -> Block {
        self.state.ledger.block_for_request(id)
    }

    /// Supporting data of the block that answered `id`, or `Hash::ZERO`
    pub fn supporting_data_for_request(&self, id: &RequestId) -> Hash {
        self.state.ledger.supporting_data_for_request(id)
    }

    pub fn request(&self, id: &RequestId) -> Option<&Request> {
        self.state.requests.get(id)
    }

    pub fn diviner(&self, address: &Address) -> Option<&DivinerStake> {
        self.state.stakes.get(address)
    }

    pub fn state(&self) -> &ConsensusState {
        &self.state
    }

    pub fn governance(&self) -> &SharedGovernance {
        &self.governance
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    fn emit_event(&self, event: ConsensusEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.try_send(event);
        }
    }
}

/// Deterministic id of the `nonce`-th withdrawal request
pub fn withdrawal_id(sender: &Address, token_bounty: Amount, nonce: u64) -> RequestId {
    let mut hasher = IncrementalHasher::new();
    hasher.update(b"withdraw");
    hasher.update(sender.as_bytes());
    hasher.update(&token_bounty.0.to_be_bytes());
    hasher.update(&nonce.to_be_bytes());
    hasher.finalize()
}

/// Create consensus event channel
pub fn create_consensus_channel(
    buffer: usize,
) -> (mpsc::Sender<ConsensusEvent>, mpsc::Receiver<ConsensusEvent>) {
    mpsc::channel(buffer.max(1))
}
