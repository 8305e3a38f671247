// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! `UpdateAppContext` dispatch to the intent controllers.

use std::collections::BTreeMap;
use std::sync::Arc;

use appsync_core::AppContext;
use appsync_core::persistence::KvStore;
use async_trait::async_trait;
use tracing::{info, instrument};

use crate::error::{IntentError, Result};
use crate::hpa::HpaPlacement;
use crate::ovn::OvnNetworking;
use crate::sfc::SfcGenerator;
use crate::sfc_client::SfcClientLabeller;
use crate::store::{IntentScope, IntentStore};

/// A controller that rewrites an AppContext from its intents.
#[async_trait]
pub trait Translator: Send + Sync {
    /// Controller name used by `UpdateAppContext`.
    fn name(&self) -> &'static str;

    /// Apply the intents of `scope` to `ac`.
    async fn translate(&self, scope: &IntentScope, ac: &AppContext) -> Result<()>;
}

/// Registered controllers sharing one intent store and AppContext store.
#[derive(Clone)]
pub struct TranslatorRegistry {
    kv: Arc<dyn KvStore>,
    translators: BTreeMap<&'static str, Arc<dyn Translator>>,
}

impl TranslatorRegistry {
    /// Registry without any controller.
    pub fn empty(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            translators: BTreeMap::new(),
        }
    }

    /// Registry with the `hpa`, `ovn`, `sfc` and `sfc-client` controllers.
    pub fn with_defaults(kv: Arc<dyn KvStore>, intents: IntentStore) -> Self {
        Self::empty(kv)
            .register(Arc::new(HpaPlacement::new(intents.clone())))
            .register(Arc::new(OvnNetworking::new(intents.clone())))
            .register(Arc::new(SfcGenerator::new(intents.clone())))
            .register(Arc::new(SfcClientLabeller::new(intents)))
    }

    pub fn register(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translators.insert(translator.name(), translator);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.translators.keys().copied().collect()
    }

    /// Run controller `controller` for `intent_name` on AppContext `app_context_id`.
    #[instrument(skip(self))]
    pub async fn update_app_context(
        &self,
        controller: &str,
        intent_name: &str,
        app_context_id: &str,
    ) -> Result<()> {
        let translator = self
            .translators
            .get(controller)
            .ok_or_else(|| IntentError::UnknownController(controller.to_string()))?;
        let ac = AppContext::load(self.kv.clone(), app_context_id).await?;
        let meta = ac.get_composite_meta().await?;
        let scope = IntentScope::new(&meta, intent_name);
        translator.translate(&scope, &ac).await?;
        info!(controller, intent_name, app_context_id, "AppContext updated");
        Ok(())
    }
}
