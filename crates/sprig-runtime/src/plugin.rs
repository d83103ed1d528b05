//! Plugin identity and declaration.
//!
//! A [`Plugin`] is a cheap, clonable handle. Its identity is the
//! [`PluginKey`] minted when the handle is built; every clone shares it, so
//! registering two clones of one handle registers the same plugin twice,
//! while two handles built from the same callback are different plugins.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::context::Context;
use crate::error::{PluginError, PluginResult};
use crate::service::{BindOptions, Capability, Invoke, Service, bind, bind_invocable};

/// Callback run against a scope and its validated config.
pub type ApplyFn = Arc<dyn Fn(&Context, &Value) -> PluginResult<()> + Send + Sync>;

type Binder<S> = fn(&Context, S, BindOptions) -> PluginResult<Capability<S>>;

/// Identity of a plugin within a [`Registry`](crate::Registry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PluginKey(Uuid);

impl PluginKey {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

/// What a plugin's body does when activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginKind {
    /// Runs an apply callback.
    Function,
    /// Constructs a [`Service`] and binds it into scope.
    Service,
}

/// Config validator.
///
/// Receives the normalized config and returns the value the plugin will see.
#[derive(Clone)]
pub struct Validator(Arc<dyn Fn(Value) -> Result<Value, String> + Send + Sync>);

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Validator")
    }
}

impl Validator {
    /// Wrap a validation function.
    pub fn new(f: impl Fn(Value) -> Result<Value, String> + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Validate by round-tripping through `T`.
    ///
    /// Serde defaults on `T` fill missing fields, and unknown shapes are
    /// rejected with the deserializer's message.
    #[must_use]
    pub fn typed<T>() -> Self
    where
        T: DeserializeOwned + Serialize + 'static,
    {
        Self::new(|value| {
            let typed: T = serde_json::from_value(value).map_err(|e| e.to_string())?;
            serde_json::to_value(typed).map_err(|e| e.to_string())
        })
    }

    /// Run the validator.
    ///
    /// # Errors
    ///
    /// Returns the validator's message when the config is rejected.
    pub fn validate(&self, value: Value) -> Result<Value, String> {
        (self.0)(value)
    }
}

struct PluginInner {
    key: PluginKey,
    name: String,
    kind: PluginKind,
    apply: ApplyFn,
    validator: Option<Validator>,
    using: Vec<String>,
}

/// Handle to a plugin definition.
#[derive(Clone)]
pub struct Plugin(Arc<PluginInner>);

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.0.name)
            .field("kind", &self.0.kind)
            .field("using", &self.0.using)
            .finish_non_exhaustive()
    }
}

impl Plugin {
    fn from_parts(
        name: String,
        kind: PluginKind,
        apply: ApplyFn,
        validator: Option<Validator>,
        using: Vec<String>,
    ) -> Self {
        Self(Arc::new(PluginInner {
            key: PluginKey::new(),
            name,
            kind,
            apply,
            validator,
            using,
        }))
    }

    /// A plugin that runs `f` when activated.
    pub fn function<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Context, &Value) -> PluginResult<()> + Send + Sync + 'static,
    {
        Self::from_parts(name.into(), PluginKind::Function, Arc::new(f), None, Vec::new())
    }

    /// A plugin that only activates while every capability in `using` is
    /// present.
    pub fn using<I, S, F>(name: impl Into<String>, using: I, f: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&Context, &Value) -> PluginResult<()> + Send + Sync + 'static,
    {
        Self::from_parts(
            name.into(),
            PluginKind::Function,
            Arc::new(f),
            None,
            using.into_iter().map(Into::into).collect(),
        )
    }

    /// A plugin that constructs a service with `factory` and binds it under
    /// the service's default name.
    ///
    /// With `immediate`, the service is published as soon as it is
    /// constructed; otherwise it is published once its `start` hook resolves.
    /// Services that declare [`Service::FORKABLE`] also get their
    /// [`Service::fork`] hook run for every fork of the plugin.
    pub fn service<S, F>(immediate: bool, factory: F) -> Self
    where
        S: Service,
        F: Fn(&Context, &Value) -> PluginResult<S> + Send + Sync + 'static,
    {
        Self::service_with(immediate, factory, bind::<S>)
    }

    /// Like [`Plugin::service`], but binds with [`bind_invocable`] so the
    /// published capability can be called.
    pub fn invocable_service<S, F>(immediate: bool, factory: F) -> Self
    where
        S: Invoke,
        F: Fn(&Context, &Value) -> PluginResult<S> + Send + Sync + 'static,
    {
        Self::service_with(immediate, factory, bind_invocable::<S>)
    }

    fn service_with<S, F>(immediate: bool, factory: F, binder: Binder<S>) -> Self
    where
        S: Service,
        F: Fn(&Context, &Value) -> PluginResult<S> + Send + Sync + 'static,
    {
        let name = S::PROVIDE.map_or_else(|| std::any::type_name::<S>().to_owned(), str::to_owned);
        let apply: ApplyFn = Arc::new(move |ctx: &Context, config: &Value| {
            let service = factory(ctx, config)?;
            let capability = binder(ctx, service, BindOptions::default().immediate(immediate))?;
            if S::FORKABLE {
                ctx.on_fork(move |fork_ctx, fork_config| capability.fork(fork_ctx, fork_config))?;
            }
            Ok(())
        });
        Self::from_parts(name, PluginKind::Service, apply, None, Vec::new())
    }

    /// Start a declaration in object form.
    #[must_use]
    pub fn decl() -> PluginDecl {
        PluginDecl::default()
    }

    /// Identity key.
    #[must_use]
    pub fn key(&self) -> PluginKey {
        self.0.key
    }

    /// Plugin name, for diagnostics only.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Kind tag.
    #[must_use]
    pub fn kind(&self) -> PluginKind {
        self.0.kind
    }

    /// Capability names this plugin depends on.
    #[must_use]
    pub fn dependencies(&self) -> &[String] {
        &self.0.using
    }

    /// Whether two handles denote the same plugin.
    #[must_use]
    pub fn same_as(&self, other: &Plugin) -> bool {
        self.0.key == other.0.key
    }

    pub(crate) fn apply(&self, ctx: &Context, config: &Value) -> PluginResult<()> {
        (self.0.apply)(ctx, config)
    }

    /// Normalize and validate a registration config.
    ///
    /// `false` means "do not install" and yields `Ok(None)`; `true` and
    /// `null` are treated as an empty object.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ConfigValidation`] when the validator rejects
    /// the config.
    pub fn validate_config(&self, config: Value) -> PluginResult<Option<Value>> {
        let config = match config {
            Value::Bool(false) => return Ok(None),
            Value::Bool(true) | Value::Null => Value::Object(Map::new()),
            other => other,
        };
        match &self.0.validator {
            Some(validator) => validator.validate(config).map(Some).map_err(|message| {
                PluginError::ConfigValidation {
                    plugin: self.0.name.clone(),
                    message,
                }
            }),
            None => Ok(Some(config)),
        }
    }
}

/// Object-form plugin declaration.
///
/// Both `config` and `schema` name a validator; when both are set, `config`
/// wins.
#[derive(Default)]
pub struct PluginDecl {
    name: Option<String>,
    apply: Option<ApplyFn>,
    config: Option<Validator>,
    schema: Option<Validator>,
    using: Vec<String>,
}

impl fmt::Debug for PluginDecl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDecl")
            .field("name", &self.name)
            .field("has_apply", &self.apply.is_some())
            .field("using", &self.using)
            .finish_non_exhaustive()
    }
}

impl PluginDecl {
    /// Set the diagnostic name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the apply callback.
    #[must_use]
    pub fn apply<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &Value) -> PluginResult<()> + Send + Sync + 'static,
    {
        self.apply = Some(Arc::new(f));
        self
    }

    /// Set the `config` validator.
    #[must_use]
    pub fn config(mut self, validator: Validator) -> Self {
        self.config = Some(validator);
        self
    }

    /// Set the `schema` validator.
    #[must_use]
    pub fn schema(mut self, validator: Validator) -> Self {
        self.schema = Some(validator);
        self
    }

    /// Declare capability dependencies.
    #[must_use]
    pub fn using<I, S>(mut self, using: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.using = using.into_iter().map(Into::into).collect();
        self
    }

    /// Finish the declaration.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidPlugin`] when no apply callback was set.
    pub fn build(self) -> PluginResult<Plugin> {
        let name = self.name.unwrap_or_else(|| "anonymous".to_owned());
        let Some(apply) = self.apply else {
            return Err(PluginError::InvalidPlugin(name));
        };
        Ok(Plugin::from_parts(
            name,
            PluginKind::Function,
            apply,
            self.config.or(self.schema),
            self.using,
        ))
    }
}

/// Anything that can be registered as a plugin.
pub trait IntoPlugin {
    /// Resolve into a plugin handle.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::InvalidPlugin`] for declarations with nothing to
    /// run.
    fn into_plugin(self) -> PluginResult<Plugin>;
}

impl IntoPlugin for Plugin {
    fn into_plugin(self) -> PluginResult<Plugin> {
        Ok(self)
    }
}

impl IntoPlugin for &Plugin {
    fn into_plugin(self) -> PluginResult<Plugin> {
        Ok(self.clone())
    }
}

impl IntoPlugin for PluginDecl {
    fn into_plugin(self) -> PluginResult<Plugin> {
        self.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn noop() -> Plugin {
        Plugin::function("noop", |_, _| Ok(()))
    }

    #[test]
    fn test_clones_share_identity() {
        let a = noop();
        let b = a.clone();
        let c = noop();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn test_decl_without_apply_is_invalid() {
        let err = Plugin::decl().name("broken").build().unwrap_err();
        assert!(matches!(err, PluginError::InvalidPlugin(name) if name == "broken"));
    }

    #[test]
    fn test_config_false_skips() {
        assert!(noop().validate_config(json!(false)).unwrap().is_none());
    }

    #[test]
    fn test_config_true_and_null_normalize() {
        let plugin = noop();
        assert_eq!(plugin.validate_config(json!(true)).unwrap(), Some(json!({})));
        assert_eq!(plugin.validate_config(Value::Null).unwrap(), Some(json!({})));
        assert_eq!(
            plugin.validate_config(json!({ "a": 1 })).unwrap(),
            Some(json!({ "a": 1 }))
        );
    }

    #[derive(Serialize, Deserialize)]
    struct Port {
        #[serde(default = "default_port")]
        port: u16,
    }

    fn default_port() -> u16 {
        8080
    }

    #[test]
    fn test_typed_validator_fills_defaults() {
        let plugin = Plugin::decl()
            .name("server")
            .apply(|_, _| Ok(()))
            .config(Validator::typed::<Port>())
            .build()
            .unwrap();

        assert_eq!(
            plugin.validate_config(json!(true)).unwrap(),
            Some(json!({ "port": 8080 }))
        );
        let err = plugin
            .validate_config(json!({ "port": "nope" }))
            .unwrap_err();
        assert!(matches!(err, PluginError::ConfigValidation { plugin, .. } if plugin == "server"));
    }

    #[test]
    fn test_config_validator_wins_over_schema() {
        let plugin = Plugin::decl()
            .apply(|_, _| Ok(()))
            .schema(Validator::new(|_| Ok(json!("schema"))))
            .config(Validator::new(|_| Ok(json!("config"))))
            .build()
            .unwrap();
        assert_eq!(plugin.validate_config(json!({})).unwrap(), Some(json!("config")));
    }
}
