use sibyl_consensus::{
    pack_responses, AnswerCallback, BlockSubmission, DeliveredAnswer, NoCallbacks,
    StakingConsensus,
};
use sibyl_core::{
    create_governance, Address, Amount, Asset, BlockHeight, ConsensusConfig, GovernanceParams,
    Hash, RewardPolicy, SibylError, SibylResult, Timestamp, TxContext,
};
use sibyl_crypto::derivation::MasterKey;
use sibyl_crypto::hashing::keccak256;
use sibyl_crypto::keys::KeyPair;
use sibyl_state::balances::ESCROW_ACCOUNT;
use sibyl_state::registry::{RequestTerms, ResponseType, ResponseValue};
use sibyl_state::store::ConsensusState;

const STAKE: u128 = 1_000;
const MINING_FEE: u128 = 100;

struct Harness {
    engine: StakingConsensus,
    keys: Vec<KeyPair>,
    requester: Address,
    submitter: Address,
}

fn harness_with(params: GovernanceParams, config: ConsensusConfig) -> Harness {
    let keys = MasterKey::from_phrase("submit block tests")
        .unwrap()
        .derive_committee(5)
        .unwrap();
    let requester = Address([0x42; 20]);
    let submitter = keys[0].address();
    let stakes: Vec<_> = keys.iter().map(|k| (k.address(), Amount::new(STAKE))).collect();
    let state = ConsensusState::genesis(
        keys.iter().map(|k| k.address()),
        &stakes,
        &[
            (requester, Asset::Token, Amount::new(1_000_000)),
            (requester, Asset::Native, Amount::new(1_000_000)),
        ],
    )
    .unwrap();
    Harness {
        engine: StakingConsensus::new(config, create_governance(params), state),
        keys,
        requester,
        submitter,
    }
}

fn harness() -> Harness {
    harness_with(GovernanceParams::default(), ConsensusConfig::default())
}

fn at(sender: Address, secs: u64) -> TxContext {
    TxContext::at(sender, Timestamp::from_secs(secs))
}

impl Harness {
    fn submit_bool_requests(&mut self, ids: &[u64]) -> Vec<Hash> {
        ids.iter()
            .map(|n| {
                let id = Hash::from_u64(*n);
                let terms = RequestTerms::answer(self.requester, Amount::ZERO, Amount::new(MINING_FEE));
                self.engine
                    .submit_request(&at(self.requester, 1), id, terms)
                    .unwrap();
                id
            })
            .collect()
    }

    /// Submission on top of the current head with the bogus data hash
    /// `keccak(previous)`, signed by `signers`
    fn submission(&self, ids: Vec<Hash>, packed: Vec<u8>, signers: &[KeyPair]) -> BlockSubmission {
        let previous = self.engine.latest_block();
        BlockSubmission::new(
            previous,
            BlockHeight(100),
            ids,
            keccak256(previous.as_bytes()),
            packed,
        )
        .signed_by(signers)
        .unwrap()
    }

    fn submit(&mut self, submission: &BlockSubmission) -> SibylResult<Hash> {
        self.engine
            .submit_block(&at(self.submitter, 2), submission, &mut NoCallbacks)
    }
}

fn bools(values: &[bool]) -> Vec<u8> {
    pack_responses(&values.iter().map(|b| ResponseValue::Bool(*b)).collect::<Vec<_>>())
}

/// Records delivered answers; fails on request
#[derive(Default)]
struct Recorder {
    fail: bool,
    staged: Vec<DeliveredAnswer>,
    committed: Vec<DeliveredAnswer>,
    rolled_back: usize,
}

impl AnswerCallback for Recorder {
    fn deliver_answer(&mut self, view: &ConsensusState, answer: &DeliveredAnswer) -> SibylResult<()> {
        // The view already carries the answer
        assert!(view.requests.is_answered(&answer.request_id));
        if self.fail {
            return Err(SibylError::CallbackFailed("recorder refused".into()));
        }
        self.staged.push(answer.clone());
        Ok(())
    }

    fn commit(&mut self) {
        self.committed.append(&mut self.staged);
    }

    fn rollback(&mut self) {
        self.staged.clear();
        self.rolled_back += 1;
    }
}

// ============ Request submission ============

#[test]
fn requests_of_every_type_accepted() {
    let mut h = harness();
    let ctx = at(h.requester, 1);
    for (n, ty) in [(1, ResponseType::Bool), (2, ResponseType::Uint), (3, ResponseType::Bool)] {
        let terms = RequestTerms::answer(h.requester, Amount::ZERO, Amount::ZERO).with_response_type(ty);
        h.engine.submit_request(&ctx, Hash::from_u64(n), terms).unwrap();
    }
    assert_eq!(h.engine.state().requests.len(), 3);
}

#[test]
fn duplicate_request_rejected() {
    let mut h = harness();
    let ctx = at(h.requester, 1);
    let terms = RequestTerms::answer(h.requester, Amount::ZERO, Amount::ZERO);
    h.engine.submit_request(&ctx, Hash::from_u64(1), terms).unwrap();
    let err = h
        .engine
        .submit_request(&ctx, Hash::from_u64(1), terms.with_response_type(ResponseType::Uint))
        .unwrap_err();
    assert!(matches!(err, SibylError::DuplicateRequest(_)));
}

#[test]
fn minimum_bounties_enforced_when_set() {
    let mut params = GovernanceParams::default();
    params.owner_set("xyXYORequestBountyMin", 100).unwrap();
    params.owner_set("xyWeiMiningMin", 100).unwrap();
    let mut h = harness_with(params, ConsensusConfig::default());
    let ctx = at(h.requester, 1);
    let id = Hash::from_u64(1);
    let escrow_before = h.engine.balance(Asset::Token, &ESCROW_ACCOUNT);

    for (token, native) in [(0, 0), (0, 100), (100, 99)] {
        let terms = RequestTerms::answer(h.requester, Amount::new(token), Amount::new(native));
        assert!(matches!(
            h.engine.submit_request(&ctx, id, terms),
            Err(SibylError::BelowMinimumBounty { .. })
        ));
    }

    let terms = RequestTerms::answer(h.requester, Amount::new(100), Amount::new(100));
    h.engine.submit_request(&ctx, id, terms).unwrap();
    assert_eq!(
        h.engine.balance(Asset::Token, &ESCROW_ACCOUNT),
        escrow_before.saturating_add(Amount::new(100))
    );
}

// ============ Block submission ============

#[test]
fn block_accepted_and_becomes_latest() {
    let mut h = harness();
    let ids = h.submit_bool_requests(&[1]);
    let keys = h.keys.clone();
    let submission = h.submission(ids, bools(&[true]), &keys);

    let hash = h.submit(&submission).unwrap();
    assert_ne!(hash, Hash::ZERO);
    assert_eq!(h.engine.latest_block(), hash);
    assert_eq!(h.engine.block(&hash).unwrap().previous, Hash::ZERO);
}

#[test]
fn three_of_five_meets_half_quorum_two_do_not() {
    let mut h = harness();
    let ids = h.submit_bool_requests(&[1]);
    let keys = h.keys.clone();

    let two = h.submission(ids.clone(), bools(&[true]), &keys[..2]);
    assert!(matches!(
        h.submit(&two),
        Err(SibylError::QuorumNotMet { signed: 2_000, total: 5_000, required_pct: 50 })
    ));
    assert_eq!(h.engine.latest_block(), Hash::ZERO);

    let three = h.submission(ids, bools(&[true]), &keys[..3]);
    let hash = h.submit(&three).unwrap();
    assert_eq!(h.engine.latest_block(), hash);
}

#[test]
fn quorum_boundary_is_inclusive() {
    let mut params = GovernanceParams::default();
    params.owner_set("xyStakeSuccessPct", 60).unwrap();
    let mut h = harness_with(params, ConsensusConfig::default());
    let ids = h.submit_bool_requests(&[1]);
    let keys = h.keys.clone();

    // 3000 * 100 == 5000 * 60
    let three = h.submission(ids, bools(&[false]), &keys[..3]);
    h.submit(&three).unwrap();

    h.engine.governance().write().owner_set("xyStakeSuccessPct", 61).unwrap();
    let ids = h.submit_bool_requests(&[2]);
    let three = h.submission(ids, bools(&[false]), &keys[..3]);
    assert!(matches!(h.submit(&three), Err(SibylError::QuorumNotMet { .. })));
}

#[test]
fn one_unit_below_quorum_fails() {
    let mut params = GovernanceParams::default();
    params.owner_set("xyStakeSuccessPct", 60).unwrap();
    let mut h = harness_with(params, ConsensusConfig::default());
    let keys = h.keys.clone();

    // Signers hold exactly 5000 * 60 / 100
    let ids = h.submit_bool_requests(&[1]);
    let exact = h.submission(ids, bools(&[true]), &keys[..3]);
    h.submit(&exact).unwrap();

    h.engine.deactivate(&at(keys[1].address(), 3), Amount::new(1)).unwrap();
    assert_eq!(h.engine.state().stakes.total_active(), Amount::new(4_999));

    // 2999 * 100 < 4999 * 60
    let ids = h.submit_bool_requests(&[2]);
    let short = h.submission(ids, bools(&[true]), &keys[..3]);
    assert!(matches!(
        h.submit(&short),
        Err(SibylError::QuorumNotMet { signed: 2_999, total: 4_999, required_pct: 60 })
    ));
}

#[test]
fn min_deposit_is_checked_but_not_escrowed() {
    let mut params = GovernanceParams::default();
    params.owner_set("pMinDeposit", 500).unwrap();
    let mut h = harness_with(params, ConsensusConfig::default());
    let requester = h.requester;
    let terms = |deposit: u128| {
        RequestTerms::answer(requester, Amount::new(10), Amount::new(MINING_FEE))
            .with_min_deposit(Amount::new(deposit))
    };

    assert!(matches!(
        h.engine.submit_request(&at(requester, 1), Hash::from_u64(1), terms(499)),
        Err(SibylError::BelowMinimumBounty { field: "min_deposit", .. })
    ));

    h.engine
        .submit_request(&at(requester, 1), Hash::from_u64(2), terms(500))
        .unwrap();
    // Only the two bounties leave the requester's balance
    assert_eq!(h.engine.balance(Asset::Token, &requester), Amount::new(1_000_000 - 10));
    assert_eq!(
        h.engine.balance(Asset::Native, &requester),
        Amount::new(1_000_000 - MINING_FEE)
    );
}

#[test]
fn unsorted_signers_rejected() {
    let mut h = harness();
    let ids = h.submit_bool_requests(&[1]);
    let keys = h.keys.clone();
    let sorted = h.submission(ids.clone(), bools(&[true]), &keys);

    let mut unsorted = BlockSubmission::new(
        sorted.previous,
        sorted.height,
        ids,
        sorted.response_data_hash,
        sorted.packed_responses.clone(),
    );
    let message = unsorted.message_hash();
    let mut by_key: Vec<&KeyPair> = keys.iter().collect();
    by_key.sort_by_key(|k| std::cmp::Reverse(k.address()));
    for key in by_key {
        let signature = sibyl_crypto::signing::sign_hash(key, &message).unwrap();
        unsorted.push_signature(key.address(), signature);
    }

    assert!(matches!(
        h.submit(&unsorted),
        Err(SibylError::SignersNotSorted { index: 1 })
    ));
}

#[test]
fn tampered_responses_rejected() {
    let mut h = harness();
    let ids = h.submit_bool_requests(&[1, 2]);
    let keys = h.keys.clone();
    let mut submission = h.submission(ids, bools(&[true, false]), &keys);
    submission.packed_responses[0] = 0;

    assert!(matches!(
        h.submit(&submission),
        Err(SibylError::SignatureMismatch { index: 0, .. })
    ));
    assert!(!h.engine.state().requests.is_answered(&Hash::from_u64(1)));
}

#[test]
fn stale_previous_rejected() {
    let mut h = harness();
    let keys = h.keys.clone();
    let ids = h.submit_bool_requests(&[1]);
    let first = h.submission(ids, bools(&[true]), &keys);
    h.submit(&first).unwrap();

    let ids = h.submit_bool_requests(&[2]);
    let mut stale = BlockSubmission::new(
        Hash::ZERO,
        BlockHeight(101),
        ids,
        Hash::ZERO,
        bools(&[true]),
    );
    stale = stale.signed_by(&keys).unwrap();
    assert!(matches!(h.submit(&stale), Err(SibylError::StalePrevious { .. })));
}

#[test]
fn answered_requests_are_not_paid_twice() {
    let mut h = harness();
    let ids = h.submit_bool_requests(&[1]);
    let keys = h.keys.clone();
    let first = h.submission(ids.clone(), bools(&[true]), &keys);
    h.submit(&first).unwrap();
    let paid = h.engine.balance(Asset::Native, &h.submitter);

    let again = h.submission(ids, bools(&[false]), &keys);
    assert!(matches!(
        h.submit(&again),
        Err(SibylError::RequestAlreadyAnswered(_))
    ));
    assert_eq!(h.engine.balance(Asset::Native, &h.submitter), paid);
    assert_eq!(
        h.engine.request(&Hash::from_u64(1)).unwrap().response,
        Some(ResponseValue::Bool(true))
    );
}

#[test]
fn reward_equals_sum_of_mining_bounties() {
    let mut h = harness();
    let ids = h.submit_bool_requests(&[1, 2, 3]);
    let keys = h.keys.clone();
    let submission = h.submission(ids, bools(&[true, false, true]), &keys);
    let native_before = h.engine.balance(Asset::Native, &h.submitter);

    h.submit(&submission).unwrap();
    assert_eq!(
        h.engine.balance(Asset::Native, &h.submitter),
        native_before.saturating_add(Amount::new(3 * MINING_FEE))
    );
    assert_eq!(h.engine.balance(Asset::Native, &ESCROW_ACCOUNT), Amount::ZERO);
}

#[test]
fn stake_weighted_policy_pays_signers() {
    let config = ConsensusConfig {
        reward_policy: RewardPolicy::StakeWeighted,
        ..Default::default()
    };
    let mut h = harness_with(GovernanceParams::default(), config);
    let ids = h.submit_bool_requests(&[1, 2]);
    let keys = h.keys.clone();
    let submission = h.submission(ids, bools(&[true, true]), &keys);
    h.submit(&submission).unwrap();

    let total: Amount = keys.iter().fold(Amount::ZERO, |acc, k| {
        acc.saturating_add(h.engine.balance(Asset::Native, &k.address()))
    });
    assert_eq!(total, Amount::new(2 * MINING_FEE));
    assert_eq!(h.engine.balance(Asset::Native, &ESCROW_ACCOUNT), Amount::ZERO);
}

#[test]
fn uint_responses_resolve() {
    let mut h = harness();
    let ctx = at(h.requester, 1);
    let ids: Vec<Hash> = (1..=2).map(Hash::from_u64).collect();
    for id in &ids {
        let terms = RequestTerms::answer(h.requester, Amount::ZERO, Amount::ZERO)
            .with_response_type(ResponseType::Uint);
        h.engine.submit_request(&ctx, *id, terms).unwrap();
    }
    let keys = h.keys.clone();
    let packed = pack_responses(&[ResponseValue::Uint(12_345_678_901_234), ResponseValue::Uint(7)]);
    let submission = h.submission(ids, packed, &keys);
    h.submit(&submission).unwrap();
    assert_eq!(
        h.engine.request(&Hash::from_u64(1)).unwrap().response,
        Some(ResponseValue::Uint(12_345_678_901_234))
    );
}

#[test]
fn short_payload_rejected() {
    let mut h = harness();
    let ids = h.submit_bool_requests(&[1, 2]);
    let keys = h.keys.clone();
    let submission = h.submission(ids, bools(&[true]), &keys);
    assert!(matches!(h.submit(&submission), Err(SibylError::MalformedResponse(_))));
}

// ============ Withdrawals ============

fn withdraw_block(h: &mut Harness, amount: u128) -> SibylResult<Hash> {
    let diviner = h.keys[1].address();
    let mut ids = h.submit_bool_requests(&[1]);
    let withdrawal = h
        .engine
        .withdraw_rewards_request(&at(diviner, 1), Amount::ZERO, Amount::ZERO)
        .unwrap();
    ids.push(withdrawal);

    let mut values = vec![ResponseValue::Bool(true)];
    values.push(ResponseValue::Uint(amount));
    let keys = h.keys.clone();
    let submission = h.submission(ids, pack_responses(&values), &keys);
    h.submit(&submission)
}

#[test]
fn diviner_withdraws_stake() {
    let mut h = harness();
    let diviner = h.keys[1].address();
    let before = h.engine.balance(Asset::Token, &diviner);

    withdraw_block(&mut h, STAKE).unwrap();
    assert_eq!(
        h.engine.balance(Asset::Token, &diviner),
        before.saturating_add(Amount::new(STAKE))
    );
    assert_eq!(h.engine.diviner(&diviner).unwrap().active, Amount::ZERO);
}

#[test]
fn withdrawing_over_stake_rejected() {
    let mut h = harness();
    let diviner = h.keys[1].address();
    let err = withdraw_block(&mut h, STAKE + 100).unwrap_err();
    assert!(matches!(err, SibylError::InsufficientBalance { .. }));
    assert_eq!(h.engine.diviner(&diviner).unwrap().active, Amount::new(STAKE));
    assert_eq!(h.engine.latest_block(), Hash::ZERO);
    // The pending first request was not answered either
    assert!(!h.engine.state().requests.is_answered(&Hash::from_u64(1)));
}

#[test]
fn only_diviners_request_withdrawals() {
    let mut h = harness();
    let err = h
        .engine
        .withdraw_rewards_request(&at(h.requester, 1), Amount::ZERO, Amount::ZERO)
        .unwrap_err();
    assert!(matches!(err, SibylError::NotADiviner(_)));
}

// ============ Lookups ============

#[test]
fn block_for_request_and_supporting_data() {
    let mut h = harness();
    let ids = h.submit_bool_requests(&[1, 2]);
    let keys = h.keys.clone();
    let submission = h.submission(ids, bools(&[true, false]), &keys);
    h.submit(&submission).unwrap();

    let block = h.engine.block_for_request(&Hash::from_u64(1));
    assert_eq!(block.creator, h.submitter);
    assert_eq!(
        h.engine.request(&Hash::from_u64(2)).unwrap().response,
        Some(ResponseValue::Bool(false))
    );
    assert_eq!(
        h.engine.supporting_data_for_request(&Hash::from_u64(1)).to_hex(),
        "290decd9548b62a8d60345a988386fc84ba6bc95484008f6362f93160ef3e563"
    );

    let unknown = Hash::from_u64(0xdead);
    assert_eq!(h.engine.block_for_request(&unknown).creator, Address::ZERO);
    assert_eq!(h.engine.supporting_data_for_request(&unknown), Hash::ZERO);
}

// ============ Callbacks ============

#[test]
fn callbacks_receive_answers_after_commit() {
    let mut h = harness();
    let ids = h.submit_bool_requests(&[1, 2]);
    let keys = h.keys.clone();
    let submission = h.submission(ids, bools(&[true, false]), &keys);

    let mut recorder = Recorder::default();
    h.engine
        .submit_block(&at(h.submitter, 2), &submission, &mut recorder)
        .unwrap();
    assert_eq!(recorder.committed.len(), 2);
    assert_eq!(recorder.committed[0].value, ResponseValue::Bool(true));
    assert_eq!(recorder.committed[1].requester, h.requester);
}

#[test]
fn failing_callback_rolls_back_block() {
    let mut h = harness();
    let ids = h.submit_bool_requests(&[1]);
    let keys = h.keys.clone();
    let submission = h.submission(ids, bools(&[true]), &keys);
    let native_before = h.engine.balance(Asset::Native, &h.submitter);

    let mut recorder = Recorder {
        fail: true,
        ..Default::default()
    };
    let err = h
        .engine
        .submit_block(&at(h.submitter, 2), &submission, &mut recorder)
        .unwrap_err();
    assert!(matches!(err, SibylError::CallbackFailed(_)));
    assert_eq!(recorder.rolled_back, 1);
    assert!(recorder.committed.is_empty());

    assert_eq!(h.engine.latest_block(), Hash::ZERO);
    assert!(!h.engine.state().requests.is_answered(&Hash::from_u64(1)));
    assert_eq!(h.engine.balance(Asset::Native, &h.submitter), native_before);

    // The same block goes through once the collaborator accepts it
    h.submit(&submission).unwrap();
}
