use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future;
use parking_lot::RwLock;
use tennis_tournament_api::{
    Challenge, ChallengeId, EventId, Inscription, InscriptionId, Match, MatchId, Player, PlayerId,
    Tournament, TournamentId,
};
#[cfg(test)]
use tennis_tournament_api::{ChallengeState, TournamentKind};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Store, StoreError, StoreFuture, Transaction};

/// A [`Store`] keeping all documents in memory.
///
/// Transactions are serialized by a single lock, so a transaction always sees the
/// latest committed state.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Held for the whole lifetime of a transaction.
    writer: Arc<Mutex<()>>,
    documents: RwLock<Documents>,
    accesses: AtomicUsize,
    /// Number of upcoming commits that fail with a contention error.
    failing_commits: AtomicUsize,
    /// Added to every inscription read and write.
    latency_ms: AtomicU64,
}

#[derive(Clone, Debug, Default)]
struct Documents {
    players: HashMap<PlayerId, Player>,
    tournaments: HashMap<TournamentId, Tournament>,
    matches: HashMap<MatchId, Match>,
    challenges: HashMap<ChallengeId, Challenge>,
    inscriptions: HashMap<InscriptionId, Inscription>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn access(&self) {
        self.inner.accesses.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Returns the number of store calls made so far.
    pub fn accesses(&self) -> usize {
        self.inner.accesses.load(Ordering::SeqCst)
    }

    pub fn insert_player(&self, player: Player) {
        self.inner
            .documents
            .write()
            .players
            .insert(player.id.clone(), player);
    }

    pub fn insert_tournament(&self, tournament: Tournament) {
        self.inner
            .documents
            .write()
            .tournaments
            .insert(tournament.id.clone(), tournament);
    }

    pub fn insert_match(&self, m: Match) {
        self.inner.documents.write().matches.insert(m.id.clone(), m);
    }

    pub fn insert_challenge(&self, challenge: Challenge) {
        self.inner
            .documents
            .write()
            .challenges
            .insert(challenge.id.clone(), challenge);
    }

    pub fn insert_inscription(&self, inscription: Inscription) {
        self.inner
            .documents
            .write()
            .inscriptions
            .insert(inscription.id.clone(), inscription);
    }

    pub fn player(&self, id: &str) -> Option<Player> {
        self.inner.documents.read().players.get(id).cloned()
    }

    pub fn get_match(&self, id: &str) -> Option<Match> {
        self.inner.documents.read().matches.get(id).cloned()
    }

    pub fn challenge(&self, id: &str) -> Option<Challenge> {
        self.inner.documents.read().challenges.get(id).cloned()
    }

    pub fn inscription(&self, id: &str) -> Option<Inscription> {
        self.inner.documents.read().inscriptions.get(id).cloned()
    }

    /// Delays every inscription read and write inside a transaction by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner
            .latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Makes the next `n` commits fail with [`StoreError::Contention`].
    pub fn fail_commits(&self, n: usize) {
        self.inner.failing_commits.store(n, Ordering::SeqCst);
    }

    /// Creates a store with a small club:
    ///
    /// - `open`: ranked bracket. `m1` ana vs bea, `m2` carla vs dani, `m6` ana vs a player
    ///   without a document.
    /// - `friendly`: unranked bracket. `m3` ana vs bea.
    /// - `ladder`: ranked ladder with the standings carla, dani, ana. `m4` is the challenge `c1`
    ///   of dani against carla, `m5` the challenge `c2` of eva (not inscribed) against ana.
    ///
    /// eva never plays in the brackets.
    pub fn fixture() -> Self {
        let store = Self::new();

        store.insert_player(Player::new("ana", "Ana"));
        store.insert_player(Player::new("bea", "Bea"));
        for (id, name, rating) in [
            ("carla", "Carla", 1600),
            ("dani", "Dani", 1400),
            ("eva", "Eva", 1200),
        ] {
            let mut player = Player::new(id, name);
            player.rank_points = rating;
            store.insert_player(player);
        }

        for (id, kind, is_ranked) in [
            ("open", TournamentKind::Bracket, true),
            ("friendly", TournamentKind::Bracket, false),
            ("ladder", TournamentKind::Ladder, true),
        ] {
            store.insert_tournament(Tournament {
                id: id.into(),
                name: id.to_owned(),
                kind,
                is_ranked,
                score_format: "3 sets".to_owned(),
            });
        }

        for (id, tournament, player1, player2, challenge) in [
            ("m1", "open", "ana", "bea", None),
            ("m2", "open", "carla", "dani", None),
            ("m3", "friendly", "ana", "bea", None),
            ("m4", "ladder", "dani", "carla", Some("c1")),
            ("m5", "ladder", "eva", "ana", Some("c2")),
            ("m6", "open", "ana", "ghost", None),
        ] {
            let mut m = Match::new(id, tournament, player1.into(), player2.into());
            m.challenge_id = challenge.map(ChallengeId::from);
            store.insert_match(m);
        }

        for (id, challenger, challenged) in [("c1", "dani", "carla"), ("c2", "eva", "ana")] {
            store.insert_challenge(Challenge {
                id: id.into(),
                event_id: "ladder".into(),
                challenger_id: challenger.into(),
                challenged_id: challenged.into(),
                state: ChallengeState::Accepted,
            });
        }

        for (id, participant, position) in [("i1", "carla", 1), ("i2", "dani", 2), ("i3", "ana", 3)]
        {
            store.insert_inscription(Inscription {
                id: id.into(),
                event_id: "ladder".into(),
                participant_id: participant.into(),
                position,
            });
        }

        store
    }
}

impl Store for MemoryStore {
    fn migrate(&self) -> StoreFuture<'_, ()> {
        Box::pin(future::ready(Ok(())))
    }

    fn begin(&self) -> StoreFuture<'_, Box<dyn Transaction>> {
        self.access();

        Box::pin(async move {
            let guard = self.inner.writer.clone().lock_owned().await;

            Ok(Box::new(MemoryTransaction {
                store: self.clone(),
                _guard: guard,
                staged: Documents::default(),
            }) as Box<dyn Transaction>)
        })
    }
}

/// A transaction on a [`MemoryStore`]. Writes are staged until [`Transaction::commit`].
struct MemoryTransaction {
    store: MemoryStore,
    _guard: OwnedMutexGuard<()>,
    staged: Documents,
}

impl MemoryTransaction {
    /// Returns a future resolving to `value` after the configured latency.
    fn delayed<'a, T>(&self, value: T) -> StoreFuture<'a, T>
    where
        T: Send + 'a,
    {
        let latency = self.store.inner.latency_ms.load(Ordering::SeqCst);
        if latency == 0 {
            return Box::pin(future::ready(Ok(value)));
        }

        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(latency)).await;
            Ok(value)
        })
    }
}

impl Transaction for MemoryTransaction {
    fn get_match<'a>(&'a mut self, id: &'a MatchId) -> StoreFuture<'a, Option<Match>> {
        self.store.access();

        let m = match self.staged.matches.get(id) {
            Some(m) => Some(m.clone()),
            None => self.store.inner.documents.read().matches.get(id).cloned(),
        };

        Box::pin(future::ready(Ok(m)))
    }

    fn get_player<'a>(&'a mut self, id: &'a PlayerId) -> StoreFuture<'a, Option<Player>> {
        self.store.access();

        let player = match self.staged.players.get(id) {
            Some(player) => Some(player.clone()),
            None => self.store.inner.documents.read().players.get(id).cloned(),
        };

        Box::pin(future::ready(Ok(player)))
    }

    fn get_tournament<'a>(
        &'a mut self,
        id: &'a TournamentId,
    ) -> StoreFuture<'a, Option<Tournament>> {
        self.store.access();

        let tournament = self.store.inner.documents.read().tournaments.get(id).cloned();
        Box::pin(future::ready(Ok(tournament)))
    }

    fn get_challenge<'a>(&'a mut self, id: &'a ChallengeId) -> StoreFuture<'a, Option<Challenge>> {
        self.store.access();

        let challenge = match self.staged.challenges.get(id) {
            Some(challenge) => Some(challenge.clone()),
            None => self.store.inner.documents.read().challenges.get(id).cloned(),
        };

        Box::pin(future::ready(Ok(challenge)))
    }

    fn find_inscription<'a>(
        &'a mut self,
        event: &'a EventId,
        participant: &'a PlayerId,
    ) -> StoreFuture<'a, Option<Inscription>> {
        self.store.access();

        let wanted = |i: &&Inscription| i.event_id == *event && i.participant_id == *participant;

        let inscription = match self.staged.inscriptions.values().find(wanted) {
            Some(inscription) => Some(inscription.clone()),
            None => self
                .store
                .inner
                .documents
                .read()
                .inscriptions
                .values()
                .find(wanted)
                .cloned(),
        };

        self.delayed(inscription)
    }

    fn unprocessed_matches(&mut self) -> StoreFuture<'_, Vec<Match>> {
        self.store.access();

        let mut matches: HashMap<MatchId, Match> = self
            .store
            .inner
            .documents
            .read()
            .matches
            .iter()
            .map(|(id, m)| (id.clone(), m.clone()))
            .collect();
        matches.extend(
            self.staged
                .matches
                .iter()
                .map(|(id, m)| (id.clone(), m.clone())),
        );

        let mut matches: Vec<Match> = matches
            .into_values()
            .filter(|m| m.is_completed() && !m.rankings_processed && !m.rankings_skipped)
            .collect();
        matches.sort_by(|a, b| {
            a.completed_at
                .cmp(&b.completed_at)
                .then_with(|| a.id.cmp(&b.id))
        });

        Box::pin(future::ready(Ok(matches)))
    }

    fn put_match<'a>(&'a mut self, m: &'a Match) -> StoreFuture<'a, ()> {
        self.store.access();

        self.staged.matches.insert(m.id.clone(), m.clone());
        Box::pin(future::ready(Ok(())))
    }

    fn put_player<'a>(&'a mut self, player: &'a Player) -> StoreFuture<'a, ()> {
        self.store.access();

        self.staged.players.insert(player.id.clone(), player.clone());
        Box::pin(future::ready(Ok(())))
    }

    fn put_challenge<'a>(&'a mut self, challenge: &'a Challenge) -> StoreFuture<'a, ()> {
        self.store.access();

        self.staged
            .challenges
            .insert(challenge.id.clone(), challenge.clone());
        Box::pin(future::ready(Ok(())))
    }

    fn put_inscription<'a>(&'a mut self, inscription: &'a Inscription) -> StoreFuture<'a, ()> {
        self.store.access();

        self.staged
            .inscriptions
            .insert(inscription.id.clone(), inscription.clone());
        self.delayed(())
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        self.store.access();

        let inner = &self.store.inner;
        let failing = inner
            .failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Box::pin(future::ready(Err(StoreError::Contention(
                "injected commit failure".to_owned(),
            ))));
        }

        let this = *self;
        {
            let staged = this.staged;
            let mut documents = this.store.inner.documents.write();
            documents.matches.extend(staged.matches);
            documents.players.extend(staged.players);
            documents.challenges.extend(staged.challenges);
            documents.inscriptions.extend(staged.inscriptions);
        }

        Box::pin(future::ready(Ok(())))
    }
}
