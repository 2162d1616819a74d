use std::sync::Arc;

use tokio::sync::{
    mpsc::{UnboundedReceiver, UnboundedSender},
    oneshot,
};

use crate::{
    error::Res,
    ledger::{CurrencyLedger, PlayerId},
    rng::RandomSource,
    roll::{
        AutoRollController, AutoRollProgress, AutoRollResult, PityState, RollKind,
        RollOrchestrator, RollResult,
    },
};

pub enum SessionRequest {
    RollOne {
        kind: RollKind,
        reply: oneshot::Sender<Res<RollResult>>,
    },
    RollBundle {
        kind: RollKind,
        count: u32,
        reply: oneshot::Sender<Res<Vec<RollResult>>>,
    },
    AutoRoll {
        kind: RollKind,
        controller: AutoRollController,
        progress: UnboundedSender<AutoRollProgress>,
        reply: oneshot::Sender<Res<AutoRollResult>>,
    },
    Pity(oneshot::Sender<PityState>),
    Close(oneshot::Sender<PityState>),
}

/// Owns one player's mutable roll state. Requests are handled strictly one
/// at a time, which is what keeps a player's pity and balance updates from
/// interleaving.
pub struct PlayerSession<L> {
    player: PlayerId,
    pity: PityState,
    rng: Box<dyn RandomSource>,
    orchestrator: Arc<RollOrchestrator<L>>,
    chan: UnboundedReceiver<SessionRequest>,
}

impl<L: CurrencyLedger + 'static> PlayerSession<L> {
    pub fn new(
        player: PlayerId,
        pity: PityState,
        rng: Box<dyn RandomSource>,
        orchestrator: Arc<RollOrchestrator<L>>,
        chan: UnboundedReceiver<SessionRequest>,
    ) -> Self {
        Self {
            player,
            pity,
            rng,
            orchestrator,
            chan,
        }
    }

    pub async fn run(mut self) {
        tracing::debug!("Session for {} started.", self.player);
        while let Some(req) = self.chan.recv().await {
            match req {
                SessionRequest::RollOne { kind, reply } => {
                    let result = self
                        .orchestrator
                        .roll_one(self.player, &mut self.pity, kind, self.rng.as_mut())
                        .await;
                    reply.send(result).ok();
                }
                SessionRequest::RollBundle { kind, count, reply } => {
                    let result = self
                        .orchestrator
                        .roll_bundle(self.player, &mut self.pity, kind, count, self.rng.as_mut())
                        .await;
                    reply.send(result).ok();
                }
                SessionRequest::AutoRoll {
                    kind,
                    mut controller,
                    progress,
                    reply,
                } => {
                    // A caller that dropped its progress receiver still gets
                    // the final result through `reply`.
                    let result = controller
                        .run(
                            self.orchestrator.as_ref(),
                            self.player,
                            &mut self.pity,
                            kind,
                            self.rng.as_mut(),
                            |event| {
                                progress.send(event).ok();
                            },
                        )
                        .await;
                    reply.send(result).ok();
                }
                SessionRequest::Pity(reply) => {
                    reply.send(self.pity.clone()).ok();
                }
                SessionRequest::Close(reply) => {
                    reply.send(self.pity.clone()).ok();
                    break;
                }
            }
        }
        tracing::debug!("Session for {} closed.", self.player);
    }
}
