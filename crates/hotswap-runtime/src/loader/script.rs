//! Rhai script units
//!
//! A script unit is a `.rhai` file. Loading compiles it and runs its
//! top-level statements once; top-level variables and constants become the
//! unit's exported values and every script function becomes an operation.
//! A top-level `DEPENDENCIES` array of strings is the unit's dependency
//! manifest:
//!
//! ```rhai
//! const DEPENDENCIES = ["base"];
//! const LIMIT = 10;
//!
//! fn tick(args) { args.n + 1 }
//! ```
//!
//! Keyword arguments are passed to the operation as one trailing object map.

use rhai::{AST, CallFnOptions, Dynamic, Engine, Map, Scope};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use hotswap_kernel::{Args, Namespace, SymbolKind, Value};

use super::{LoadError, SourceImage, UnitLoader};

/// Name of the top-level constant holding a script's dependency manifest
pub const DEPENDENCIES_SYMBOL: &str = "DEPENDENCIES";

/// Loader for `.rhai` script units
pub struct ScriptLoader {
    engine: Arc<Engine>,
}

impl ScriptLoader {
    /// Create a loader with a default engine whose `print`/`debug` go to tracing
    pub fn new() -> Self {
        let mut engine = Engine::new();
        engine.on_print(|text| info!(target: "hotswap::script", "{}", text));
        engine.on_debug(|text, source, pos| {
            debug!(target: "hotswap::script", "{} @ {:?} {}", text, source, pos)
        });
        Self::with_engine(engine)
    }

    /// Create a loader around a caller-configured engine, e.g. one with
    /// host functions registered
    pub fn with_engine(engine: Engine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

impl Default for ScriptLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitLoader for ScriptLoader {
    fn name(&self) -> &'static str {
        "script"
    }

    fn handles(&self, extension: &str) -> bool {
        extension.eq_ignore_ascii_case("rhai")
    }

    fn load(&self, unit: &str, image: &SourceImage) -> Result<Arc<dyn Namespace>, LoadError> {
        let source = std::str::from_utf8(&image.bytes)
            .map_err(|e| LoadError::Compile(format!("source is not UTF-8: {}", e)))?;

        let ast = self
            .engine
            .compile(source)
            .map_err(|e| LoadError::Compile(e.to_string()))?;

        let mut scope = Scope::new();
        self.engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| LoadError::Init(e.to_string()))?;

        let values: BTreeMap<String, Value> = scope
            .iter()
            .map(|(name, _constant, value)| (name.to_string(), dynamic_to_json(&value)))
            .collect();

        let mut functions: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for f in ast.iter_functions() {
            functions
                .entry(f.name.to_string())
                .or_default()
                .push(f.params.len());
        }

        let dependencies = match values.get(DEPENDENCIES_SYMBOL) {
            None => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        LoadError::InvalidManifest(format!(
                            "{} entries must be strings, got {}",
                            DEPENDENCIES_SYMBOL, item
                        ))
                    })
                })
                .collect::<Result<_, _>>()?,
            Some(other) => {
                return Err(LoadError::InvalidManifest(format!(
                    "{} must be an array, got {}",
                    DEPENDENCIES_SYMBOL, other
                )));
            }
        };

        debug!(
            "Script unit {} exposes {} operations and {} values",
            unit,
            functions.len(),
            values.len()
        );

        Ok(Arc::new(ScriptNamespace {
            engine: self.engine.clone(),
            ast,
            functions,
            values,
            dependencies,
        }))
    }
}

/// Namespace of one loaded script
pub struct ScriptNamespace {
    engine: Arc<Engine>,
    ast: AST,
    /// Function name → accepted parameter counts
    functions: BTreeMap<String, Vec<usize>>,
    values: BTreeMap<String, Value>,
    dependencies: Vec<String>,
}

impl Namespace for ScriptNamespace {
    fn lookup(&self, symbol: &str) -> Option<SymbolKind> {
        if self.functions.contains_key(symbol) {
            Some(SymbolKind::Operation)
        } else if self.values.contains_key(symbol) {
            Some(SymbolKind::Value)
        } else {
            None
        }
    }

    fn operations(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    fn value(&self, symbol: &str) -> Option<Value> {
        self.values.get(symbol).cloned()
    }

    fn call(&self, operation: &str, args: &Args) -> Result<Value, String> {
        let mut call_args: Vec<Dynamic> = args.positional.iter().map(json_to_dynamic).collect();
        if !args.keyword.is_empty() {
            let mut map = Map::new();
            for (k, v) in &args.keyword {
                map.insert(k.clone().into(), json_to_dynamic(v));
            }
            call_args.push(Dynamic::from(map));
        }

        let arities = self
            .functions
            .get(operation)
            .ok_or_else(|| format!("function {} not defined", operation))?;
        if !arities.contains(&call_args.len()) {
            return Err(format!(
                "function {} takes {:?} arguments, {} given",
                operation,
                arities,
                call_args.len()
            ));
        }

        let mut scope = Scope::new();
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let result: Dynamic = self
            .engine
            .call_fn_with_options(options, &mut scope, &self.ast, operation, call_args)
            .map_err(|e| e.to_string())?;

        Ok(dynamic_to_json(&result))
    }

    fn declared_dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }
}

/// Convert a JSON value to a Rhai `Dynamic`
pub fn json_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Dynamic::from(i)
            } else if let Some(f) = n.as_f64() {
                Dynamic::from(f)
            } else {
                Dynamic::UNIT
            }
        }
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Array(arr) => {
            let vec: Vec<Dynamic> = arr.iter().map(json_to_dynamic).collect();
            Dynamic::from(vec)
        }
        Value::Object(obj) => {
            let mut map = Map::new();
            for (k, v) in obj {
                map.insert(k.clone().into(), json_to_dynamic(v));
            }
            Dynamic::from(map)
        }
    }
}

/// Convert a Rhai `Dynamic` to a JSON value
pub fn dynamic_to_json(value: &Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Some(b) = value.clone().try_cast::<bool>() {
        Value::Bool(b)
    } else if let Some(i) = value.clone().try_cast::<i64>() {
        serde_json::json!(i)
    } else if let Some(f) = value.clone().try_cast::<f64>() {
        serde_json::json!(f)
    } else if let Some(s) = value.clone().try_cast::<String>() {
        Value::String(s)
    } else if value.is_array() {
        let arr = value.clone().cast::<rhai::Array>();
        Value::Array(arr.iter().map(dynamic_to_json).collect())
    } else if value.is_map() {
        let map = value.clone().cast::<Map>();
        let mut obj = serde_json::Map::new();
        for (k, v) in map.iter() {
            obj.insert(k.to_string(), dynamic_to_json(v));
        }
        Value::Object(obj)
    } else {
        Value::String(value.to_string())
    }
}
