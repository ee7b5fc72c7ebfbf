//! Node runtime: the engine and its collaborators behind one lock

use parking_lot::Mutex;
use sibyl_consensus::{
    create_consensus_channel, BlockSubmission, ConsensusEvent, StakingConsensus,
};
use sibyl_core::{
    create_governance, Address, Amount, Asset, BlockHash, Hash, NodeConfig, RequestId,
    SibylError, SibylResult, TokenCustody, TxContext,
};
use sibyl_crypto::hashing::hash;
use sibyl_crypto::keys::KeyPair;
use sibyl_delivery::{DeliveryBook, DeliveryRequest, PayOnDelivery};
use sibyl_state::custody::VoteCustody;
use sibyl_state::ledger::Block;
use sibyl_state::registry::{Request, RequestTerms, ResponseType};
use sibyl_state::stake::DivinerStake;
use sibyl_state::store::ConsensusState;
use sibyl_state::PersistentLedger;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::genesis::{compute_genesis_hash, GenesisConfig};

const DELIVERY_BOOK: &str = "delivery";
const VOTE_CUSTODY: &str = "custody";

/// Engine account of the node's pay-on-delivery book
pub fn delivery_address() -> Address {
    let digest = hash(b"sibyl.pay-on-delivery");
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest.as_bytes()[12..]);
    Address::from_bytes(bytes)
}

/// Engine account holding tokens deposited as voting rights
pub fn custody_address() -> Address {
    let digest = hash(b"sibyl.vote-custody");
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&digest.as_bytes()[12..]);
    Address::from_bytes(bytes)
}

/// Pay-on-delivery order as submitted by a requester
#[derive(Debug, Clone, Copy)]
pub struct DeliveryOrder {
    pub request_id: RequestId,
    pub response_type: ResponseType,
    pub token_payment: Amount,
    pub token_bounty: Amount,
    pub native_on_delivery: Amount,
    pub beneficiary: Address,
    /// Native value attached: delivery payment plus mining bounty
    pub value: Amount,
}

struct Chain {
    engine: StakingConsensus,
    delivery: PayOnDelivery,
    custody: VoteCustody,
}

impl Chain {
    fn new(
        state: ConsensusState,
        delivery: PayOnDelivery,
        custody: VoteCustody,
        config: &NodeConfig,
        genesis: &GenesisConfig,
    ) -> Self {
        let governance = create_governance(genesis.governance.clone());
        Self {
            engine: StakingConsensus::new(config.consensus.clone(), governance, state),
            delivery,
            custody,
        }
    }

    fn save(&self, storage: &PersistentLedger) -> SibylResult<()> {
        storage.save_with(
            self.engine.state(),
            &[
                (DELIVERY_BOOK, self.delivery.book().to_bytes()?),
                (VOTE_CUSTODY, self.custody.to_bytes()?),
            ],
        )
    }
}

/// Node runtime managing all components
pub struct NodeRuntime {
    config: NodeConfig,
    keypair: KeyPair,
    genesis_hash: Hash,
    chain: Mutex<Chain>,
    storage: Option<PersistentLedger>,
    events: Mutex<Option<mpsc::Receiver<ConsensusEvent>>>,
}

impl NodeRuntime {
    /// Create a runtime, resuming from the data directory when a saved state exists
    pub fn new(config: NodeConfig, keypair: KeyPair, genesis: &GenesisConfig) -> SibylResult<Self> {
        let genesis_hash = compute_genesis_hash(genesis)?;

        let storage = if config.persist {
            Some(PersistentLedger::open(config.data_dir.join("ledger"))?)
        } else {
            None
        };
        let resumed = match &storage {
            Some(storage) => match storage.load()? {
                Some(state) => {
                    info!("Resumed consensus state at height {}", state.height());
                    let delivery = match storage.attachment(DELIVERY_BOOK)? {
                        Some(bytes) => {
                            let book = DeliveryBook::from_bytes(&bytes)?;
                            info!("Resumed {} pay-on-delivery requests", book.requests.len());
                            PayOnDelivery::restore(delivery_address(), book)
                        }
                        None => PayOnDelivery::new(delivery_address()),
                    };
                    let custody = match storage.attachment(VOTE_CUSTODY)? {
                        Some(bytes) => VoteCustody::from_bytes(&bytes)?,
                        None => VoteCustody::new(),
                    };
                    Some(Chain::new(state, delivery, custody, &config, genesis))
                }
                None => None,
            },
            None => None,
        };
        let mut chain = match resumed {
            Some(chain) => chain,
            None => {
                let chain = Chain::new(
                    genesis.build_state()?,
                    PayOnDelivery::new(delivery_address()),
                    VoteCustody::new(),
                    &config,
                    genesis,
                );
                if let Some(storage) = &storage {
                    chain.save(storage)?;
                }
                chain
            }
        };

        let (event_tx, event_rx) = create_consensus_channel(config.consensus.event_buffer);
        chain.engine.set_event_channel(event_tx);

        info!("Genesis hash: {}", genesis_hash);

        Ok(Self {
            config,
            keypair,
            genesis_hash,
            chain: Mutex::new(chain),
            storage,
            events: Mutex::new(Some(event_rx)),
        })
    }

    pub fn address(&self) -> Address {
        self.keypair.address()
    }

    pub fn genesis_hash(&self) -> Hash {
        self.genesis_hash
    }

    /// Take the consensus event stream; `None` once taken
    pub fn take_events(&self) -> Option<mpsc::Receiver<ConsensusEvent>> {
        self.events.lock().take()
    }

    // ============ Transactions ============

    pub fn submit_request(
        &self,
        ctx: &TxContext,
        id: RequestId,
        terms: RequestTerms,
    ) -> SibylResult<()> {
        let mut chain = self.chain.lock();
        chain.engine.submit_request(ctx, id, terms)?;
        self.persist(&chain, "request");
        Ok(())
    }

    /// Register a pay-on-delivery order; returns its index in the delivery book
    pub fn submit_delivery_request(&self, ctx: &TxContext, order: DeliveryOrder) -> SibylResult<usize> {
        let mut guard = self.chain.lock();
        let Chain { engine, delivery, .. } = &mut *guard;
        let index = match order.response_type {
            ResponseType::Bool => delivery.request_pay_on_delivery(
                engine,
                ctx,
                order.request_id,
                order.token_payment,
                order.token_bounty,
                order.native_on_delivery,
                order.beneficiary,
                order.value,
            ),
            ResponseType::Uint => delivery.submit_uint_request(
                engine,
                ctx,
                order.request_id,
                order.token_payment,
                order.token_bounty,
                order.native_on_delivery,
                order.beneficiary,
                order.value,
            ),
        }?;
        self.persist(&guard, "delivery request");
        Ok(index)
    }

    /// Prepare a withdrawal; `nonce` must be the current withdrawal nonce
    pub fn withdraw(
        &self,
        ctx: &TxContext,
        nonce: u64,
        token_bounty: Amount,
        mining_fee: Amount,
    ) -> SibylResult<RequestId> {
        let mut chain = self.chain.lock();
        let expected = chain.engine.state().withdrawal_nonce;
        if nonce != expected {
            return Err(SibylError::InvalidParameter(format!(
                "withdrawal nonce {} is not the next nonce {}",
                nonce, expected
            )));
        }
        let id = chain
            .engine
            .withdraw_rewards_request(ctx, token_bounty, mining_fee)?;
        self.persist(&chain, "withdrawal");
        Ok(id)
    }

    /// Submit a signed block, settle delivery payouts and persist the result
    pub fn submit_block(
        &self,
        ctx: &TxContext,
        submission: &BlockSubmission,
    ) -> SibylResult<BlockHash> {
        let mut guard = self.chain.lock();
        let Chain { engine, delivery, .. } = &mut *guard;

        let block_hash = engine.submit_block(ctx, submission, delivery)?;

        // The block is final; a failed payout stays queued for the next block
        if let Err(e) = delivery.settle(engine) {
            warn!(
                "Delivery settlement incomplete, {} payouts pending: {}",
                delivery.pending_payouts().len(),
                e
            );
        }

        self.persist(&guard, "block");
        Ok(block_hash)
    }

    /// Save the state together with the collaborators' records
    ///
    /// A failure is logged only; the change stays applied in memory and the
    /// next successful save covers it.
    fn persist(&self, chain: &Chain, what: &str) {
        let Some(storage) = &self.storage else {
            return;
        };
        if let Err(e) = chain.save(storage) {
            error!("Failed to persist {}: {}", what, e);
        }
    }

    // ============ Vote custody ============

    /// Deposit `amount` tokens of the sender as voting rights; returns the
    /// sender's total rights
    pub fn request_voting_rights(&self, ctx: &TxContext, amount: Option<Amount>) -> SibylResult<Amount> {
        let mut guard = self.chain.lock();
        let Chain { engine, custody, .. } = &mut *guard;

        let mut updated = custody.clone();
        let total = updated.request_voting_rights(ctx.sender, amount)?;
        engine.transfer(ctx, Asset::Token, custody_address(), amount.unwrap_or(Amount::ZERO))?;
        *custody = updated;

        self.persist(&guard, "voting rights");
        Ok(total)
    }

    /// Return unlocked voting rights to the sender as tokens
    pub fn withdraw_voting_rights(&self, ctx: &TxContext, amount: Amount) -> SibylResult<Amount> {
        let mut guard = self.chain.lock();
        let Chain { engine, custody, .. } = &mut *guard;

        let mut updated = custody.clone();
        let released = updated.withdraw_voting_rights(ctx.sender, amount)?;
        let own = TxContext::at(custody_address(), ctx.timestamp);
        engine.transfer(&own, Asset::Token, ctx.sender, released)?;
        *custody = updated;

        self.persist(&guard, "voting rights");
        Ok(released)
    }

    pub fn lock_for_poll(&self, voter: Address, poll_id: u64, amount: Amount) -> SibylResult<()> {
        let mut chain = self.chain.lock();
        chain.custody.lock_for_poll(voter, poll_id, amount)?;
        self.persist(&chain, "poll lock");
        Ok(())
    }

    pub fn end_poll(&self, poll_id: u64) {
        let mut chain = self.chain.lock();
        chain.custody.end_poll(poll_id);
        self.persist(&chain, "poll end");
    }

    /// Unlock the voter's tokens in finished polls; rights stay deposited
    pub fn rescue_tokens(&self, voter: Address, poll_ids: &[u64]) -> SibylResult<Amount> {
        let mut chain = self.chain.lock();
        let released = match poll_ids {
            [poll_id] => chain.custody.rescue_tokens(voter, Some(*poll_id))?,
            _ => chain.custody.rescue_tokens_in_multiple_polls(voter, poll_ids)?,
        };
        self.persist(&chain, "rescue");
        Ok(released)
    }

    pub fn voting_rights(&self, voter: &Address) -> Amount {
        self.chain.lock().custody.voting_rights(voter)
    }

    pub fn locked_tokens(&self, voter: &Address) -> Amount {
        self.chain.lock().custody.locked_tokens(voter)
    }

    // ============ Queries ============

    pub fn latest_block(&self) -> (BlockHash, Option<Block>) {
        let guard = self.chain.lock();
        let hash = guard.engine.latest_block();
        (hash, guard.engine.block(&hash).cloned())
    }

    /// Block by hash, falling back to the on-disk archive
    pub fn block(&self, hash: &BlockHash) -> SibylResult<Option<Block>> {
        if let Some(block) = self.chain.lock().engine.block(hash).cloned() {
            return Ok(Some(block));
        }
        match &self.storage {
            Some(storage) => storage.block(hash),
            None => Ok(None),
        }
    }

    pub fn block_for_request(&self, id: &RequestId) -> Block {
        self.chain.lock().engine.block_for_request(id)
    }

    pub fn supporting_data_for_request(&self, id: &RequestId) -> Hash {
        self.chain.lock().engine.supporting_data_for_request(id)
    }

    pub fn request(&self, id: &RequestId) -> Option<Request> {
        self.chain.lock().engine.request(id).cloned()
    }

    pub fn delivery(&self, id: &RequestId) -> Option<DeliveryRequest> {
        let guard = self.chain.lock();
        let index = guard.delivery.request_index(id)?;
        guard.delivery.requests(index).cloned()
    }

    pub fn balance(&self, asset: Asset, account: &Address) -> Amount {
        self.chain.lock().engine.balance(asset, account)
    }

    pub fn diviner(&self, address: &Address) -> Option<DivinerStake> {
        self.chain.lock().engine.diviner(address).cloned()
    }

    pub fn chain_height(&self) -> u64 {
        self.chain.lock().engine.state().height()
    }

    pub fn withdrawal_nonce(&self) -> u64 {
        self.chain.lock().engine.state().withdrawal_nonce
    }

    pub fn pending_requests(&self) -> usize {
        self.chain.lock().engine.state().requests.pending().len()
    }

    pub fn committee_size(&self) -> usize {
        self.chain.lock().engine.state().stakes.len()
    }

    pub fn total_active_stake(&self) -> Amount {
        self.chain.lock().engine.state().stakes.total_active()
    }

    pub fn state_digest(&self) -> SibylResult<Hash> {
        self.chain.lock().engine.state().digest()
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sibyl_consensus::pack_responses;
    use sibyl_core::{BlockHeight, Timestamp};
    use sibyl_crypto::derivation::MasterKey;
    use sibyl_state::registry::ResponseValue;

    const PHRASE: &str = "runtime test";
    const REQUESTER: Address = Address([0x42; 20]);

    fn committee() -> Vec<KeyPair> {
        MasterKey::from_phrase(PHRASE).unwrap().derive_committee(3).unwrap()
    }

    fn genesis() -> GenesisConfig {
        GenesisConfig::devnet_committee(PHRASE, 3, 1_000)
            .unwrap()
            .add_allocation(&REQUESTER.to_hex(), Asset::Token, 10_000)
            .add_allocation(&REQUESTER.to_hex(), Asset::Native, 10_000)
    }

    fn create_test_runtime(config: NodeConfig) -> NodeRuntime {
        NodeRuntime::new(config, KeyPair::generate(), &genesis()).unwrap()
    }

    fn in_memory() -> NodeConfig {
        NodeConfig {
            persist: false,
            ..Default::default()
        }
    }

    fn ctx(sender: Address) -> TxContext {
        TxContext::at(sender, Timestamp::from_secs(10))
    }

    fn signed_block(runtime: &NodeRuntime, ids: Vec<Hash>, values: &[ResponseValue]) -> BlockSubmission {
        BlockSubmission::new(
            runtime.latest_block().0,
            BlockHeight(1),
            ids,
            Hash::from_u64(0xabc),
            pack_responses(values),
        )
        .signed_by(&committee())
        .unwrap()
    }

    #[tokio::test]
    async fn test_runtime_creation() {
        let runtime = create_test_runtime(in_memory());

        assert_eq!(runtime.chain_height(), 0);
        assert_eq!(runtime.committee_size(), 3);
        assert_eq!(runtime.total_active_stake(), Amount::new(3_000));
        assert_eq!(runtime.latest_block().0, Hash::ZERO);
        assert!(runtime.take_events().is_some());
        assert!(runtime.take_events().is_none());
    }

    #[tokio::test]
    async fn test_request_and_block() {
        let runtime = create_test_runtime(in_memory());
        let mut events = runtime.take_events().unwrap();
        let id = Hash::from_u64(1);

        runtime
            .submit_request(
                &ctx(REQUESTER),
                id,
                RequestTerms::answer(REQUESTER, Amount::new(10), Amount::new(50)),
            )
            .unwrap();
        assert_eq!(runtime.pending_requests(), 1);

        let submission = signed_block(&runtime, vec![id], &[ResponseValue::Bool(true)]);
        let submitter = committee()[0].address();
        let block_hash = runtime.submit_block(&ctx(submitter), &submission).unwrap();

        assert_eq!(runtime.latest_block().0, block_hash);
        assert_eq!(runtime.block_for_request(&id).creator, submitter);
        assert_eq!(runtime.supporting_data_for_request(&id), Hash::from_u64(0xabc));
        assert_eq!(runtime.pending_requests(), 0);
        assert_eq!(runtime.balance(Asset::Native, &submitter), Amount::new(50));

        assert_eq!(events.recv().await, Some(ConsensusEvent::RequestSubmitted(id)));
        assert_eq!(events.recv().await, Some(ConsensusEvent::BlockCreated(block_hash)));
    }

    #[tokio::test]
    async fn test_delivery_settles_after_block() {
        let runtime = create_test_runtime(in_memory());
        let beneficiary = Address([0xbe; 20]);
        let id = Hash::from_u64(2);

        let index = runtime
            .submit_delivery_request(
                &ctx(REQUESTER),
                DeliveryOrder {
                    request_id: id,
                    response_type: ResponseType::Bool,
                    token_payment: Amount::new(300),
                    token_bounty: Amount::ZERO,
                    native_on_delivery: Amount::new(400),
                    beneficiary,
                    value: Amount::new(450),
                },
            )
            .unwrap();
        assert_eq!(index, 0);

        let submission = signed_block(&runtime, vec![id], &[ResponseValue::Bool(true)]);
        runtime
            .submit_block(&ctx(committee()[1].address()), &submission)
            .unwrap();

        let delivered = runtime.delivery(&id).unwrap();
        assert_eq!(delivered.answer, Some(ResponseValue::Bool(true)));
        assert_eq!(runtime.balance(Asset::Token, &beneficiary), Amount::new(300));
        assert_eq!(runtime.balance(Asset::Native, &beneficiary), Amount::new(400));
    }

    #[tokio::test]
    async fn test_rejected_block_changes_nothing() {
        let runtime = create_test_runtime(in_memory());
        let id = Hash::from_u64(3);
        runtime
            .submit_request(
                &ctx(REQUESTER),
                id,
                RequestTerms::answer(REQUESTER, Amount::ZERO, Amount::new(5)),
            )
            .unwrap();
        let digest = runtime.state_digest().unwrap();

        let mut submission = signed_block(&runtime, vec![id], &[ResponseValue::Bool(true)]);
        submission.packed_responses = vec![0];
        assert!(runtime
            .submit_block(&ctx(committee()[0].address()), &submission)
            .is_err());
        assert_eq!(runtime.state_digest().unwrap(), digest);
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let id = Hash::from_u64(4);

        let block_hash = {
            let runtime = create_test_runtime(config.clone());
            runtime
                .submit_request(
                    &ctx(REQUESTER),
                    id,
                    RequestTerms::answer(REQUESTER, Amount::new(1), Amount::new(1)),
                )
                .unwrap();
            let submission = signed_block(&runtime, vec![id], &[ResponseValue::Bool(false)]);
            runtime
                .submit_block(&ctx(committee()[0].address()), &submission)
                .unwrap()
        };

        let restarted = create_test_runtime(config);
        assert_eq!(restarted.chain_height(), 1);
        assert_eq!(restarted.latest_block().0, block_hash);
        assert!(restarted.request(&id).unwrap().is_answered());
        assert!(restarted.block(&block_hash).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_pending_delivery_answered_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let beneficiary = Address([0xbe; 20]);
        let (order_id, other_id) = (Hash::from_u64(5), Hash::from_u64(6));

        {
            let runtime = create_test_runtime(config.clone());
            runtime
                .submit_delivery_request(
                    &ctx(REQUESTER),
                    DeliveryOrder {
                        request_id: order_id,
                        response_type: ResponseType::Bool,
                        token_payment: Amount::new(300),
                        token_bounty: Amount::ZERO,
                        native_on_delivery: Amount::new(400),
                        beneficiary,
                        value: Amount::new(450),
                    },
                )
                .unwrap();
            runtime
                .submit_request(
                    &ctx(REQUESTER),
                    other_id,
                    RequestTerms::answer(REQUESTER, Amount::ZERO, Amount::new(5)),
                )
                .unwrap();
            let submission = signed_block(&runtime, vec![other_id], &[ResponseValue::Bool(true)]);
            runtime
                .submit_block(&ctx(committee()[0].address()), &submission)
                .unwrap();
        }

        let restarted = create_test_runtime(config);
        assert!(restarted.delivery(&order_id).unwrap().answer.is_none());

        let submission = signed_block(&restarted, vec![order_id], &[ResponseValue::Bool(true)]);
        restarted
            .submit_block(&ctx(committee()[1].address()), &submission)
            .unwrap();

        assert_eq!(
            restarted.delivery(&order_id).unwrap().answer,
            Some(ResponseValue::Bool(true))
        );
        assert_eq!(restarted.balance(Asset::Token, &beneficiary), Amount::new(300));
        assert_eq!(restarted.balance(Asset::Native, &beneficiary), Amount::new(400));
    }

    #[test]
    fn test_voting_rights_lock_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            data_dir: dir.path().to_path_buf(),
            ..Default::default()
        };

        {
            let runtime = create_test_runtime(config.clone());
            assert!(runtime.request_voting_rights(&ctx(REQUESTER), None).is_err());
            assert!(runtime
                .request_voting_rights(&ctx(REQUESTER), Some(Amount::new(20_000)))
                .is_err());

            let total = runtime
                .request_voting_rights(&ctx(REQUESTER), Some(Amount::new(500)))
                .unwrap();
            assert_eq!(total, Amount::new(500));
            assert_eq!(runtime.balance(Asset::Token, &REQUESTER), Amount::new(9_500));
            assert_eq!(runtime.balance(Asset::Token, &custody_address()), Amount::new(500));

            runtime.lock_for_poll(REQUESTER, 1, Amount::new(300)).unwrap();
            assert!(runtime.withdraw_voting_rights(&ctx(REQUESTER), Amount::new(201)).is_err());
            assert!(runtime.rescue_tokens(REQUESTER, &[1]).is_err());
        }

        // Locks and deposits survive a restart
        let runtime = create_test_runtime(config);
        assert_eq!(runtime.voting_rights(&REQUESTER), Amount::new(500));
        assert_eq!(runtime.locked_tokens(&REQUESTER), Amount::new(300));
        assert!(runtime.rescue_tokens(REQUESTER, &[]).is_err());

        runtime.end_poll(1);
        assert_eq!(runtime.rescue_tokens(REQUESTER, &[1, 2]).unwrap(), Amount::new(300));
        assert_eq!(
            runtime.withdraw_voting_rights(&ctx(REQUESTER), Amount::new(500)).unwrap(),
            Amount::new(500)
        );
        assert_eq!(runtime.voting_rights(&REQUESTER), Amount::ZERO);
        assert_eq!(runtime.balance(Asset::Token, &REQUESTER), Amount::new(10_000));
    }

    #[test]
    fn test_withdraw_requires_diviner() {
        let runtime = create_test_runtime(in_memory());
        assert!(runtime.withdraw(&ctx(REQUESTER), 0, Amount::ZERO, Amount::ZERO).is_err());

        let diviner = committee()[2].address();
        let id = runtime.withdraw(&ctx(diviner), 0, Amount::ZERO, Amount::ZERO).unwrap();
        assert!(runtime.request(&id).is_some());
        assert_eq!(runtime.withdrawal_nonce(), 1);

        // The same nonce cannot be spent twice
        assert!(matches!(
            runtime.withdraw(&ctx(diviner), 0, Amount::ZERO, Amount::ZERO),
            Err(SibylError::InvalidParameter(_))
        ));
    }
}
