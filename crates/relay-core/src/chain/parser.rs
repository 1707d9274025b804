use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tracing::debug;

use crate::error::{CoreError, RelayError};
use crate::parser::{parse_block_from_params, JsonRpcInput};
use crate::spec::{ApiCollection, ChainSpec, FunctionTag, ParseDirective, Verification};
use crate::state::{BlockTimeUpdatable, SpecUpdatable};
use crate::types::{ChainBlockStats, RpcProviderEndpoint};

/// API interfaces whose payloads are JSON-RPC envelopes (`method` + `params`).
pub const SUPPORTED_INTERFACES: &[&str] = &["jsonrpc", "tendermintrpc"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserPhase {
    /// Created, no spec yet.
    Draft,
    /// A spec has been delivered.
    Registered,
    /// Serving. The provider policy is frozen.
    Active,
}

/// Addons this endpoint's nodes can serve, aggregated from its node URLs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderPolicy {
    pub addons: Vec<String>,
}

impl ProviderPolicy {
    pub fn from_endpoint(endpoint: &RpcProviderEndpoint) -> Self {
        Self {
            addons: endpoint.addons(),
        }
    }

    pub fn allows(&self, addon: &str) -> bool {
        addon.is_empty() || self.addons.iter().any(|a| a == addon)
    }
}

/// The parts of a relay payload the serving path acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRelay {
    pub api: String,
    pub compute_units: u64,
    pub requested_block: i64,
    pub addon: String,
}

struct ParserState {
    phase: ParserPhase,
    spec: Option<Arc<ChainSpec>>,
    collection: Option<ApiCollection>,
    policy: ProviderPolicy,
    measured_block_time: Option<Duration>,
}

/// Per-endpoint view of a chain spec for one API interface.
pub struct ChainParser {
    api_interface: String,
    state: RwLock<ParserState>,
}

impl ChainParser {
    pub fn new(api_interface: &str) -> Result<Self, CoreError> {
        if !SUPPORTED_INTERFACES.contains(&api_interface) {
            return Err(CoreError::Spec(format!(
                "no chain parser for api interface {api_interface:?}"
            )));
        }
        Ok(Self {
            api_interface: api_interface.to_owned(),
            state: RwLock::new(ParserState {
                phase: ParserPhase::Draft,
                spec: None,
                collection: None,
                policy: ProviderPolicy::default(),
                measured_block_time: None,
            }),
        })
    }

    pub fn api_interface(&self) -> &str {
        &self.api_interface
    }

    pub fn phase(&self) -> ParserPhase {
        self.read().phase
    }

    /// Apply the addon policy. Rejected once the parser is active, and for
    /// addons the spec does not define.
    pub fn set_policy(&self, policy: ProviderPolicy) -> Result<(), CoreError> {
        let mut state = self.write();
        if state.phase == ParserPhase::Active {
            return Err(CoreError::Spec("parser is active; policy is frozen".into()));
        }
        if let Some(collection) = &state.collection {
            if let Some(unknown) = policy
                .addons
                .iter()
                .find(|addon| !collection.apis.iter().any(|api| &api.addon == *addon))
            {
                return Err(CoreError::Spec(format!(
                    "addon {unknown:?} is not defined for {}",
                    self.api_interface
                )));
            }
        }
        state.policy = policy;
        Ok(())
    }

    pub fn activate(&self) -> Result<(), CoreError> {
        let mut state = self.write();
        match state.phase {
            ParserPhase::Draft => Err(CoreError::Spec(
                "cannot activate a parser before its spec arrives".into(),
            )),
            ParserPhase::Registered | ParserPhase::Active => {
                state.phase = ParserPhase::Active;
                Ok(())
            }
        }
    }

    pub fn spec(&self) -> Option<Arc<ChainSpec>> {
        self.read().spec.clone()
    }

    pub fn chain_block_stats(&self) -> Result<ChainBlockStats, CoreError> {
        let state = self.read();
        let spec = state
            .spec
            .as_ref()
            .ok_or_else(|| CoreError::Spec("chain spec not received yet".into()))?;
        Ok(ChainBlockStats {
            average_block_time: state
                .measured_block_time
                .unwrap_or_else(|| spec.average_block_time()),
            allowed_block_lag_for_qos_sync: spec.allowed_block_lag_for_qos_sync,
            block_distance_for_finalized_data: spec.block_distance_for_finalized_data,
            blocks_in_finalization_proof: spec.blocks_in_finalization_proof,
        })
    }

    pub fn data_reliability_enabled(&self) -> bool {
        self.read()
            .spec
            .as_ref()
            .is_some_and(|spec| spec.data_reliability_enabled)
    }

    pub fn directive(&self, tag: FunctionTag) -> Option<ParseDirective> {
        self.read()
            .collection
            .as_ref()
            .and_then(|c| c.directive(tag).cloned())
    }

    pub fn verifications(&self) -> Vec<Verification> {
        self.read()
            .collection
            .as_ref()
            .map(|c| c.verifications.clone())
            .unwrap_or_default()
    }

    pub fn policy(&self) -> ProviderPolicy {
        self.read().policy.clone()
    }

    /// Resolve the API a JSON-RPC payload calls and the block it references.
    pub fn parse_relay(&self, data: &serde_json::Value, addon: &str) -> Result<ParsedRelay, RelayError> {
        let state = self.read();
        let collection = state
            .collection
            .as_ref()
            .ok_or_else(|| RelayError::Internal("chain spec not received yet".into()))?;

        let method = data
            .get("method")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| RelayError::BadRequest("payload has no method".into()))?;
        let api = collection
            .api(method)
            .filter(|api| api.enabled)
            .ok_or_else(|| RelayError::BadRequest(format!("api {method} is not supported")))?;

        let effective_addon = if addon.is_empty() { api.addon.as_str() } else { addon };
        if api.addon != effective_addon || !state.policy.allows(effective_addon) {
            return Err(RelayError::BadRequest(format!(
                "api {method} requires addon {:?}, request asked for {addon:?}",
                api.addon
            )));
        }

        let params = data.get("params").cloned().unwrap_or(serde_json::Value::Null);
        let input = JsonRpcInput::from(params);
        let requested_block = parse_block_from_params(&input, &api.block_parsing)?;
        debug!(api = method, requested_block, "parsed relay");

        Ok(ParsedRelay {
            api: api.name.clone(),
            compute_units: api.compute_units,
            requested_block,
            addon: api.addon.clone(),
        })
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ParserState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ParserState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SpecUpdatable for ChainParser {
    fn set_spec(&self, spec: Arc<ChainSpec>) -> Result<(), CoreError> {
        let collection = spec.collection(&self.api_interface).cloned().ok_or_else(|| {
            CoreError::Spec(format!(
                "spec {} has no {} api collection",
                spec.index, self.api_interface
            ))
        })?;

        let mut state = self.write();
        state.spec = Some(spec);
        state.collection = Some(collection);
        if state.phase == ParserPhase::Draft {
            state.phase = ParserPhase::Registered;
        }
        Ok(())
    }
}

impl BlockTimeUpdatable for ChainParser {
    fn update_block_time(&self, block_time: Duration) {
        self.write().measured_block_time = Some(block_time);
    }
}
