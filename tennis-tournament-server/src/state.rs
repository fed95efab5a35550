use std::ops::Deref;
use std::sync::Arc;

use crate::auth::Authorization;
use crate::config::Config;
use crate::reconcile::Reconciler;
use crate::settlement::Settlement;
use crate::store::Store;
use crate::Error;

#[cfg(feature = "metrics")]
use crate::metrics::Metrics;

/// Everything a request handler needs, built once at startup.
#[derive(Clone, Debug)]
pub struct State(Arc<StateInner>);

impl State {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Result<Self, Error> {
        let policy = config.rating.policy()?;
        let max_attempts = config.settlement.max_attempts;

        let auth = Authorization::new(
            config.authorization.alg,
            config.authorization.secret.as_bytes(),
        );

        let settlement = Settlement::new(store.clone(), policy, max_attempts);
        let reconciler = Reconciler::new(store.clone(), policy, max_attempts);

        Ok(Self(Arc::new(StateInner {
            config,
            store,
            auth,
            settlement,
            reconciler,

            #[cfg(feature = "metrics")]
            metrics: Metrics::default(),
        })))
    }
}

impl Deref for State {
    type Target = StateInner;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug)]
pub struct StateInner {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub auth: Authorization,
    pub settlement: Settlement,
    pub reconciler: Reconciler,

    #[cfg(feature = "metrics")]
    pub metrics: Metrics,
}
