//! Unified tool catalog over the remote (MCP) and internal sources.
//!
//! Every tool is exposed under a qualified name `<source>--<local>`, so
//! execution routing is a prefix match that never consults the catalog.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chorus_common::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::confirmation::{ToolConfirmationProvider, ToolExecutionRequest};
use super::internal::{InternalToolProvider, InternalToolServices};
use super::{ToolCatalog, ToolDefinition, ToolMap, ToolOutput, ToolSource, ToolSourceKind};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ToolStats {
    pub total: usize,
    pub mcp: usize,
    pub internal: usize,
}

pub struct ToolManager {
    remote: Arc<dyn ToolSource>,
    internal: RwLock<Option<Arc<dyn ToolSource>>>,
    confirmation: Arc<dyn ToolConfirmationProvider>,
    cache: RwLock<Option<Arc<ToolCatalog>>>,
    /// Serializes rebuilds so concurrent misses share one discovery pass.
    rebuild_lock: Mutex<()>,
    /// Bumped on every invalidation; a rebuild only publishes its result if
    /// no invalidation happened while it ran.
    generation: AtomicU64,
}

impl ToolManager {
    /// Internal tools start disabled until [`initialize_internal_tools`] or
    /// [`set_internal_source`] is called.
    ///
    /// [`initialize_internal_tools`]: ToolManager::initialize_internal_tools
    /// [`set_internal_source`]: ToolManager::set_internal_source
    pub fn new(
        remote: Arc<dyn ToolSource>,
        confirmation: Arc<dyn ToolConfirmationProvider>,
    ) -> Self {
        Self {
            remote,
            internal: RwLock::new(None),
            confirmation,
            cache: RwLock::new(None),
            rebuild_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        }
    }

    /// Build the built-in tool provider for `enabled` and install it. An
    /// empty list installs a provider with zero tools.
    pub async fn initialize_internal_tools(
        &self,
        services: InternalToolServices,
        enabled: Vec<String>,
    ) {
        let provider = InternalToolProvider::new(services, enabled);
        provider.initialize().await;
        self.set_internal_source(Arc::new(provider)).await;
    }

    pub async fn set_internal_source(&self, source: Arc<dyn ToolSource>) {
        *self.internal.write().await = Some(source);
        self.invalidate_cache().await;
    }

    pub async fn invalidate_cache(&self) {
        let mut cache = self.cache.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        *cache = None;
    }

    pub async fn refresh(&self) {
        debug!("tool catalog refresh requested");
        self.invalidate_cache().await;
    }

    /// Merged catalog of every tool, keyed by qualified name.
    pub async fn get_all_tools(&self) -> Result<Arc<ToolCatalog>> {
        if let Some(catalog) = self.cache.read().await.as_ref() {
            return Ok(Arc::clone(catalog));
        }

        let _rebuild = self.rebuild_lock.lock().await;
        if let Some(catalog) = self.cache.read().await.as_ref() {
            return Ok(Arc::clone(catalog));
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let catalog = Arc::new(self.build_catalog().await?);

        let mut cache = self.cache.write().await;
        if self.generation.load(Ordering::SeqCst) == generation {
            *cache = Some(Arc::clone(&catalog));
        } else {
            debug!("tool catalog invalidated during rebuild, not caching");
        }
        Ok(catalog)
    }

    async fn build_catalog(&self) -> Result<ToolCatalog> {
        let remote = self.remote.get_all_tools().await?;

        let internal_source = self.internal.read().await.clone();
        let internal = match internal_source {
            Some(source) => match source.get_all_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    warn!("internal tool discovery failed, continuing without them: {e}");
                    ToolMap::new()
                }
            },
            None => ToolMap::new(),
        };

        let mut catalog = ToolCatalog::new();
        for (kind, tools) in [
            (ToolSourceKind::Mcp, remote),
            (ToolSourceKind::Internal, internal),
        ] {
            for (local, definition) in tools {
                let qualified = kind.qualify(&local);
                catalog.insert(qualified.clone(), annotate(kind, qualified, definition));
            }
        }

        info!(
            "tool catalog rebuilt: {} tool(s) ({} internal)",
            catalog.len(),
            catalog
                .keys()
                .filter(|k| k.starts_with(ToolSourceKind::Internal.prefix()))
                .count()
        );
        Ok(catalog)
    }

    async fn source_for(&self, kind: ToolSourceKind) -> Result<Arc<dyn ToolSource>> {
        match kind {
            ToolSourceKind::Mcp => Ok(Arc::clone(&self.remote)),
            ToolSourceKind::Internal => self
                .internal
                .read()
                .await
                .clone()
                .ok_or_else(|| Error::Config("internal tools have not been initialized".into())),
        }
    }

    /// Route a call by its qualified name. Source errors are returned as-is.
    pub async fn execute_tool(
        &self,
        qualified_name: &str,
        args: Value,
        session_id: Option<&str>,
    ) -> Result<ToolOutput> {
        let (kind, local) = ToolSourceKind::parse(qualified_name)
            .ok_or_else(|| Error::ToolNotFound(qualified_name.to_string()))?;
        let source = self.source_for(kind).await?;

        let request = ToolExecutionRequest {
            tool_name: qualified_name.to_string(),
            args,
            session_id: session_id.map(str::to_string),
        };
        if !self.confirmation.request_confirmation(&request).await? {
            return Err(Error::ToolDenied(qualified_name.to_string()));
        }

        debug!("routing '{qualified_name}' to {} source as '{local}'", kind.prefix());
        source.execute_tool(local, request.args, session_id).await
    }

    pub async fn has_tool(&self, qualified_name: &str) -> Result<bool> {
        let Some((kind, local)) = ToolSourceKind::parse(qualified_name) else {
            return Ok(false);
        };
        match self.source_for(kind).await {
            Ok(source) => source.has_tool(local).await,
            Err(_) => Ok(false),
        }
    }

    pub async fn get_tool_stats(&self) -> Result<ToolStats> {
        let catalog = self.get_all_tools().await?;
        let mut stats = ToolStats {
            total: catalog.len(),
            ..ToolStats::default()
        };
        for name in catalog.keys() {
            match ToolSourceKind::parse(name) {
                Some((ToolSourceKind::Mcp, _)) => stats.mcp += 1,
                Some((ToolSourceKind::Internal, _)) => stats.internal += 1,
                None => {}
            }
        }
        Ok(stats)
    }
}

fn annotate(kind: ToolSourceKind, qualified: String, definition: ToolDefinition) -> ToolDefinition {
    let description = if definition.description.trim().is_empty() {
        kind.annotation().to_string()
    } else {
        format!("{} {}", definition.description.trim_end(), kind.annotation())
    };
    ToolDefinition {
        name: qualified,
        description,
        parameters: definition.parameters,
    }
}
