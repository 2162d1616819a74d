use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::{
    mpsc::{self, UnboundedSender},
    oneshot,
};
use uuid::Uuid;

use crate::{
    error::Res,
    ledger::{CurrencyLedger, PlayerId},
    rng::{RandomSource, SeededRandom, SystemRandom},
    roll::{
        AutoRollConfig, AutoRollController, AutoRollProgress, AutoRollResult, CancelToken,
        PityState, RollKind, RollOrchestrator, RollResult,
    },
    RollError,
};

mod session;

use session::{PlayerSession, SessionRequest};

/// Builds the random source for a new session from the player and a count of
/// sessions opened so far on the engine.
type RngFactory = dyn Fn(PlayerId, u64) -> Box<dyn RandomSource> + Send + Sync;

/// Handle on a running auto-roll.
pub struct AutoRollHandle {
    id: Uuid,
    player: PlayerId,
    cancel: CancelToken,
    result: oneshot::Receiver<Res<AutoRollResult>>,
}

impl AutoRollHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn player(&self) -> PlayerId {
        self.player
    }

    /// Ask the auto-roll to stop before its next roll.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the terminal result.
    pub async fn finished(self) -> Res<AutoRollResult> {
        self.result.await.map_err(|_| RollError::SessionClosed)?
    }
}

enum Slot {
    Open(UnboundedSender<SessionRequest>),
    /// Close was requested and the session is still draining its queue.
    Closing,
}

#[derive(Default)]
struct Sessions {
    slots: HashMap<PlayerId, Slot>,
    opened: u64,
}

/// Entry point for callers. Each open player session is a task that
/// serialises that player's rolls; different players roll in parallel.
/// Cheap to clone.
///
/// Sessions are explicit: a player must be opened with `open_session` before
/// rolling, and stays open until `close_session` hands back the pity state.
/// Requests for a player without an open session fail with `SessionClosed`.
pub struct RollEngine<L> {
    orchestrator: Arc<RollOrchestrator<L>>,
    sessions: Arc<Mutex<Sessions>>,
    rng_factory: Arc<RngFactory>,
}

impl<L> Clone for RollEngine<L> {
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            sessions: self.sessions.clone(),
            rng_factory: self.rng_factory.clone(),
        }
    }
}

impl<L: CurrencyLedger + 'static> RollEngine<L> {
    pub fn new(orchestrator: RollOrchestrator<L>) -> Self {
        Self::with_rng(orchestrator, |_, _| Box::new(SystemRandom::new()))
    }

    /// Deterministic engine. Each session's stream is seeded from `seed`, the
    /// player id and how many sessions were opened before it, so reopening a
    /// player never replays an earlier stream.
    pub fn with_seed(orchestrator: RollOrchestrator<L>, seed: u64) -> Self {
        Self::with_rng(orchestrator, move |player, generation| {
            let (high, low) = player.as_u64_pair();
            let generation = generation.wrapping_mul(0x9E37_79B9_7F4A_7C15);
            Box::new(SeededRandom::new(seed ^ high ^ low.rotate_left(32) ^ generation))
        })
    }

    pub fn with_rng<F>(orchestrator: RollOrchestrator<L>, rng_factory: F) -> Self
    where
        F: Fn(PlayerId, u64) -> Box<dyn RandomSource> + Send + Sync + 'static,
    {
        Self {
            orchestrator: Arc::new(orchestrator),
            sessions: Arc::new(Mutex::new(Sessions::default())),
            rng_factory: Arc::new(rng_factory),
        }
    }

    pub fn orchestrator(&self) -> &RollOrchestrator<L> {
        &self.orchestrator
    }

    /// True while the player has a live session that accepts requests.
    pub fn is_open(&self, player: PlayerId) -> bool {
        match self.lock() {
            Ok(sessions) => matches!(
                sessions.slots.get(&player),
                Some(Slot::Open(chan)) if !chan.is_closed()
            ),
            Err(_) => false,
        }
    }

    /// Start a session from persisted pity state. Counters are reconciled
    /// with the configured pity rules.
    pub fn open_session(&self, player: PlayerId, pity: PityState) -> Res<()> {
        let mut sessions = self.lock()?;
        match sessions.slots.get(&player) {
            Some(Slot::Open(chan)) if !chan.is_closed() => {
                return Err(RollError::Configuration(format!(
                    "Session for {player} is already open."
                )));
            }
            Some(Slot::Closing) => {
                return Err(RollError::Configuration(format!(
                    "Session for {player} is still closing."
                )));
            }
            _ => {}
        }

        sessions.opened += 1;
        let generation = sessions.opened;
        let pity = pity.reconcile(&self.orchestrator.config().pity);
        let chan = self.spawn_session(player, pity, generation);
        sessions.slots.insert(player, Slot::Open(chan));
        Ok(())
    }

    /// End a session and hand back its pity state for the caller to persist.
    /// Requests already queued are served first; new ones are refused from
    /// the moment this is called.
    pub async fn close_session(&self, player: PlayerId) -> Res<PityState> {
        let chan = {
            let mut sessions = self.lock()?;
            let chan = match sessions.slots.get(&player) {
                Some(Slot::Open(chan)) => chan.clone(),
                _ => return Err(RollError::SessionClosed),
            };
            sessions.slots.insert(player, Slot::Closing);
            chan
        };

        let (reply, rx) = oneshot::channel();
        chan.send(SessionRequest::Close(reply)).ok();
        let pity = rx.await.map_err(|_| RollError::SessionClosed);

        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.slots.remove(&player);
        }
        pity
    }

    pub async fn pity_state(&self, player: PlayerId) -> Res<PityState> {
        self.request(player, SessionRequest::Pity).await
    }

    pub async fn roll_one(&self, player: PlayerId, kind: RollKind) -> Res<RollResult> {
        self.request(player, |reply| SessionRequest::RollOne { kind, reply })
            .await?
    }

    pub async fn roll_bundle(
        &self,
        player: PlayerId,
        kind: RollKind,
        count: u32,
    ) -> Res<Vec<RollResult>> {
        self.request(player, |reply| SessionRequest::RollBundle { kind, count, reply })
            .await?
    }

    /// Queue an auto-roll on the player's session. Progress events arrive on
    /// `progress`; the run ends with `AutoRollProgress::Finished` unless it
    /// fails, in which case the error is returned from the handle.
    pub fn start_auto_roll(
        &self,
        player: PlayerId,
        kind: RollKind,
        config: AutoRollConfig,
        progress: UnboundedSender<AutoRollProgress>,
    ) -> Res<AutoRollHandle> {
        let controller = AutoRollController::new(config)?;
        let cancel = controller.cancel_token();
        let (reply, result) = oneshot::channel();
        self.session(player)?
            .send(SessionRequest::AutoRoll {
                kind,
                controller,
                progress,
                reply,
            })
            .map_err(|_| RollError::SessionClosed)?;

        let handle = AutoRollHandle {
            id: Uuid::new_v4(),
            player,
            cancel,
            result,
        };
        tracing::debug!("Queued auto-roll {} for {player}.", handle.id);
        Ok(handle)
    }

    pub fn cancel_auto_roll(&self, handle: &AutoRollHandle) {
        tracing::debug!("Cancelling auto-roll {}.", handle.id);
        handle.cancel();
    }

    async fn request<T>(
        &self,
        player: PlayerId,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionRequest,
    ) -> Res<T> {
        let (reply, rx) = oneshot::channel();
        self.session(player)?
            .send(make(reply))
            .map_err(|_| RollError::SessionClosed)?;
        rx.await.map_err(|_| RollError::SessionClosed)
    }

    fn lock(&self) -> Res<MutexGuard<'_, Sessions>> {
        self.sessions.lock().map_err(|_| RollError::SessionClosed)
    }

    /// Mailbox of the player's open session.
    fn session(&self, player: PlayerId) -> Res<UnboundedSender<SessionRequest>> {
        let mut sessions = self.lock()?;
        let chan = match sessions.slots.get(&player) {
            Some(Slot::Open(chan)) => chan.clone(),
            _ => return Err(RollError::SessionClosed),
        };
        if chan.is_closed() {
            tracing::warn!("Session for {player} stopped without being closed.");
            sessions.slots.remove(&player);
            return Err(RollError::SessionClosed);
        }
        Ok(chan)
    }

    fn spawn_session(
        &self,
        player: PlayerId,
        pity: PityState,
        generation: u64,
    ) -> UnboundedSender<SessionRequest> {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = PlayerSession::new(
            player,
            pity,
            (self.rng_factory)(player, generation),
            self.orchestrator.clone(),
            rx,
        );
        tokio::spawn(session.run());
        tx
    }
}

#[cfg(test)]
mod test {
    use std::sync::{Arc, Mutex};

    use tokio::sync::mpsc;
    use uuid::Uuid;

    use crate::{
        cards::Rarity,
        ledger::{Currency, CurrencyLedger, InMemoryLedger, PlayerId},
        rng::{RandomSource, SeededRandom},
        roll::{
            fixtures, AutoRollConfig, AutoRollProgress, PityRule, PityState, RollKind,
            RollOrchestrator, StopReason,
        },
        RollError,
    };

    use super::RollEngine;

    fn orchestrator(
        pity: Vec<PityRule>,
        ledger: Arc<InMemoryLedger>,
    ) -> RollOrchestrator<InMemoryLedger> {
        RollOrchestrator::new(
            Arc::new(fixtures::catalog()),
            Arc::new(fixtures::config(pity)),
            ledger,
        )
        .unwrap()
    }

    fn engine(pity: Vec<PityRule>, ledger: Arc<InMemoryLedger>) -> RollEngine<InMemoryLedger> {
        RollEngine::with_seed(orchestrator(pity, ledger), 99)
    }

    fn open(engine: &RollEngine<InMemoryLedger>, player: PlayerId) {
        engine.open_session(player, PityState::default()).unwrap();
    }

    #[tokio::test]
    async fn test_roll_one_and_bundle() {
        let player = Uuid::new_v4();
        let ledger = Arc::new(InMemoryLedger::with_balance(player, Currency::Gold, 100));
        let engine = engine(Vec::new(), ledger.clone());
        open(&engine, player);

        let single = engine.roll_one(player, RollKind::Standard).await.unwrap();
        assert_eq!(single.cost_charged.amount, 10);

        let bundle = engine
            .roll_bundle(player, RollKind::Standard, 10)
            .await
            .unwrap();
        assert_eq!(bundle.len(), 10);
        assert!(bundle[9].rarity_drawn >= Rarity::Epic);
        assert_eq!(ledger.balance(player, Currency::Gold).await, Ok(0));

        assert!(engine
            .roll_one(player, RollKind::Standard)
            .await
            .unwrap_err()
            .is_insufficient_currency());
    }

    #[tokio::test]
    async fn test_rolling_needs_open_session() {
        let player = Uuid::new_v4();
        let ledger = Arc::new(InMemoryLedger::with_balance(player, Currency::Gold, 100));
        let engine = engine(Vec::new(), ledger.clone());

        assert_eq!(
            engine.roll_one(player, RollKind::Standard).await,
            Err(RollError::SessionClosed)
        );
        assert_eq!(
            engine.pity_state(player).await,
            Err(RollError::SessionClosed)
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = AutoRollConfig {
            max_rolls: 5,
            stop_on_rarity: Rarity::Cosmic,
            batch_size: 1,
        };
        assert!(matches!(
            engine.start_auto_roll(player, RollKind::Standard, config, tx),
            Err(RollError::SessionClosed)
        ));

        // Nothing was started or charged on the player's behalf.
        assert!(!engine.is_open(player));
        assert_eq!(ledger.balance(player, Currency::Gold).await, Ok(100));
    }

    #[tokio::test]
    async fn test_concurrent_rolls_for_one_player_serialised() {
        let player = Uuid::new_v4();
        let ledger = Arc::new(InMemoryLedger::with_balance(player, Currency::Gold, 200));
        let engine = engine(vec![PityRule::new(Rarity::Rare, 10)], ledger.clone());
        open(&engine, player);

        let mut tasks = Vec::new();
        for _ in 0..30 {
            let engine = engine.clone();
            tasks.push(tokio::spawn(async move {
                engine.roll_one(player, RollKind::Standard).await
            }));
        }
        let mut rolled = Vec::new();
        let mut refused = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(result) => rolled.push(result),
                Err(e) => {
                    assert!(e.is_insufficient_currency());
                    refused += 1;
                }
            }
        }

        assert_eq!(rolled.len(), 20);
        assert_eq!(refused, 10);
        assert_eq!(ledger.balance(player, Currency::Gold).await, Ok(0));

        let pity = engine.pity_state(player).await.unwrap();
        assert!(pity.counter(Rarity::Rare).unwrap().consecutive_misses < 10);
        let rares = rolled
            .iter()
            .filter(|r| r.rarity_drawn >= Rarity::Rare)
            .count();
        assert!(rares >= 2);
    }

    #[tokio::test]
    async fn test_players_are_independent() {
        let rich = Uuid::new_v4();
        let poor = Uuid::new_v4();
        let ledger = Arc::new(InMemoryLedger::with_balance(rich, Currency::Gold, 50));
        let engine = engine(Vec::new(), ledger.clone());
        open(&engine, rich);
        open(&engine, poor);

        let (a, b) = tokio::join!(
            engine.roll_one(rich, RollKind::Standard),
            engine.roll_one(poor, RollKind::Standard)
        );
        assert!(a.is_ok());
        assert_eq!(
            b,
            Err(RollError::InsufficientCurrency {
                currency: Currency::Gold,
                required: 10,
                available: 0,
            })
        );
    }

    #[tokio::test]
    async fn test_session_round_trips_pity() {
        let player = Uuid::new_v4();
        let ledger = Arc::new(InMemoryLedger::with_balance(player, Currency::Gold, 1_000));
        let engine = engine(vec![PityRule::new(Rarity::Rare, 10)], ledger);

        let rules = [PityRule::new(Rarity::Rare, 10)];
        let mut saved = PityState::new(&rules);
        for _ in 0..9 {
            saved = saved.record(Rarity::Common);
        }
        engine.open_session(player, saved).unwrap();
        assert!(engine.open_session(player, PityState::default()).is_err());

        // The loaded streak forces the very first roll of the session.
        let result = engine.roll_one(player, RollKind::Standard).await.unwrap();
        assert!(result.pity_triggered);
        assert!(result.rarity_drawn >= Rarity::Rare);

        let closed = engine.close_session(player).await.unwrap();
        assert_eq!(closed.counter(Rarity::Rare).unwrap().consecutive_misses, 0);
        assert!(!engine.is_open(player));
        assert_eq!(
            engine.close_session(player).await,
            Err(RollError::SessionClosed)
        );

        // A closed player can be opened again from the returned state.
        engine.open_session(player, closed.clone()).unwrap();
        assert_eq!(engine.pity_state(player).await, Ok(closed));
    }

    #[tokio::test]
    async fn test_no_second_session_while_closing() {
        let player = Uuid::new_v4();
        let ledger = Arc::new(InMemoryLedger::with_balance(player, Currency::Gold, 10_000));
        let engine = engine(Vec::new(), ledger.clone());
        open(&engine, player);

        let (tx, _rx) = mpsc::unbounded_channel();
        let config = AutoRollConfig {
            max_rolls: 200,
            stop_on_rarity: Rarity::Cosmic,
            batch_size: 1,
        };
        let handle = engine
            .start_auto_roll(player, RollKind::Standard, config, tx)
            .unwrap();
        let closing = tokio::spawn({
            let engine = engine.clone();
            async move { engine.close_session(player).await }
        });
        while engine.is_open(player) {
            tokio::task::yield_now().await;
        }

        // The old session is still draining its auto-roll. Nothing new may
        // run for the player until it is gone.
        assert_eq!(
            engine.roll_one(player, RollKind::Standard).await,
            Err(RollError::SessionClosed)
        );
        assert!(matches!(
            engine.open_session(player, PityState::default()),
            Err(RollError::Configuration(_))
        ));

        let result = handle.finished().await.unwrap();
        assert_eq!(result.total_rolls, 200);
        assert_eq!(result.stopped_reason, StopReason::MaxReached);
        assert!(closing.await.unwrap().is_ok());
        assert_eq!(
            ledger.balance(player, Currency::Gold).await,
            Ok(10_000 - 200 * 10)
        );
        open(&engine, player);
    }

    #[tokio::test]
    async fn test_reopened_session_gets_fresh_stream() {
        let player = Uuid::new_v4();
        let ledger = Arc::new(InMemoryLedger::with_balance(player, Currency::Gold, 100));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let engine = RollEngine::with_rng(orchestrator(Vec::new(), ledger), {
            let seen = seen.clone();
            move |_: PlayerId, generation: u64| -> Box<dyn RandomSource> {
                seen.lock().unwrap().push(generation);
                Box::new(SeededRandom::new(generation))
            }
        });

        open(&engine, player);
        engine.close_session(player).await.unwrap();
        open(&engine, player);
        engine.close_session(player).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_auto_roll_reports_progress() {
        let player = Uuid::new_v4();
        let ledger = Arc::new(InMemoryLedger::with_balance(player, Currency::Gold, 75));
        let engine = engine(Vec::new(), ledger);
        open(&engine, player);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = AutoRollConfig {
            max_rolls: 100,
            stop_on_rarity: Rarity::Cosmic,
            batch_size: 4,
        };
        let handle = engine
            .start_auto_roll(player, RollKind::Standard, config, tx)
            .unwrap();
        let result = handle.finished().await.unwrap();
        assert_eq!(result.total_rolls, 7);
        assert_eq!(result.stopped_reason, StopReason::InsufficientCurrency);

        let mut rolled = 0;
        let mut last = None;
        while let Some(event) = rx.recv().await {
            if let AutoRollProgress::Rolled(_) = event {
                rolled += 1;
            }
            last = Some(event);
        }
        assert_eq!(rolled, 7);
        assert_eq!(last, Some(AutoRollProgress::Finished(result)));
    }

    #[tokio::test]
    async fn test_cancel_auto_roll() {
        let player = Uuid::new_v4();
        let ledger = Arc::new(InMemoryLedger::with_balance(player, Currency::Gold, 10_000));
        let engine = engine(Vec::new(), ledger);
        open(&engine, player);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = AutoRollConfig {
            max_rolls: 1_000,
            stop_on_rarity: Rarity::Cosmic,
            batch_size: 1,
        };
        let handle = engine
            .start_auto_roll(player, RollKind::Standard, config, tx)
            .unwrap();

        // Wait for a few rolls to land, then cancel.
        let mut seen = 0;
        while seen < 3 {
            if let Some(AutoRollProgress::Rolled(_)) = rx.recv().await {
                seen += 1;
            }
        }
        engine.cancel_auto_roll(&handle);
        let result = handle.finished().await.unwrap();

        assert_eq!(result.stopped_reason, StopReason::Cancelled);
        assert!(result.total_rolls >= 3);
        assert!(result.total_rolls < 1_000);
        assert_eq!(result.rolls.len() as u32, result.total_rolls);
    }

    #[tokio::test]
    async fn test_invalid_auto_roll_config_rejected() {
        let engine = engine(Vec::new(), Arc::new(InMemoryLedger::new()));
        let player = Uuid::new_v4();
        open(&engine, player);
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = AutoRollConfig {
            max_rolls: 0,
            stop_on_rarity: Rarity::Rare,
            batch_size: 1,
        };
        assert!(matches!(
            engine.start_auto_roll(player, RollKind::Standard, config, tx),
            Err(RollError::Configuration(_))
        ));
    }
}
