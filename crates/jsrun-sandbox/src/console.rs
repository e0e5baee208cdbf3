//! Guest `console.log` argument formatting.
//!
//! The builtins used for formatting are captured when the bridge is
//! installed, before guest code runs, so reassigning `JSON.stringify` or
//! `Object.prototype.toString` from the guest does not change the output.
//! Every call into the guest heap runs under a `TryCatch`; formatting never
//! throws into the guest.

use deno_core::v8;

/// Rendered when a value cannot be serialized (cycles, BigInt, throwing `toJSON`).
pub const UNSERIALIZABLE: &str = "[Unserializable Object]";

const OBJECT_TAG: &str = "[object Object]";

/// Builtins captured from a pristine context.
pub(crate) struct Formatter {
    stringify: v8::Global<v8::Function>,
    object_to_string: v8::Global<v8::Function>,
    string: v8::Global<v8::Function>,
}

impl Formatter {
    /// Capture `JSON.stringify`, `Object.prototype.toString` and `String`
    /// from `global`. Returns `None` if any of them is missing.
    pub(crate) fn capture(
        scope: &mut v8::HandleScope<'_>,
        global: v8::Local<'_, v8::Object>,
    ) -> Option<Self> {
        let json = get_object(scope, global, "JSON")?;
        let stringify = get_function(scope, json, "stringify")?;
        let object = get_object(scope, global, "Object")?;
        let prototype = get_object(scope, object, "prototype")?;
        let object_to_string = get_function(scope, prototype, "toString")?;
        let string = get_function(scope, global, "String")?;
        Some(Self {
            stringify: v8::Global::new(scope, stringify),
            object_to_string: v8::Global::new(scope, object_to_string),
            string: v8::Global::new(scope, string),
        })
    }

    /// Format one `console.log` call: every argument, joined with one space.
    pub(crate) fn format_args<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
        args: &v8::FunctionCallbackArguments<'s>,
    ) -> String {
        let mut parts = Vec::with_capacity(usize::try_from(args.length()).unwrap_or_default());
        for i in 0..args.length() {
            parts.push(self.format(scope, args.get(i)));
        }
        parts.join(" ")
    }

    fn format(&self, scope: &mut v8::HandleScope<'_>, value: v8::Local<'_, v8::Value>) -> String {
        if value.is_string() {
            return value.to_rust_string_lossy(scope);
        }

        let tc = &mut v8::TryCatch::new(scope);
        if let Ok(map) = v8::Local::<v8::Map>::try_from(value) {
            let flat = map.as_array(tc);
            let entries: Vec<String> = (0..flat.length() / 2)
                .map(|i| {
                    let key = flat.get_index(tc, 2 * i);
                    let val = flat.get_index(tc, 2 * i + 1);
                    format!("{} => {}", self.entry(tc, key), self.entry(tc, val))
                })
                .collect();
            return format!("Map({}) {{ {} }}", map.size(), entries.join(", "));
        }
        if let Ok(set) = v8::Local::<v8::Set>::try_from(value) {
            let flat = set.as_array(tc);
            let items: Vec<String> = (0..flat.length())
                .map(|i| {
                    let item = flat.get_index(tc, i);
                    self.entry(tc, item)
                })
                .collect();
            return format!("Set({}) {{ {} }}", set.size(), items.join(", "));
        }

        let pretty = self.tag(tc, value).as_deref() == Some(OBJECT_TAG);
        match self.stringify(tc, value, pretty) {
            Ok(Some(json)) => json,
            // `undefined`, functions and symbols have no JSON form.
            Ok(None) => String::new(),
            Err(()) => UNSERIALIZABLE.to_string(),
        }
    }

    /// A Map/Set element: strings single-quoted, anything else via `String(x)`.
    fn entry(
        &self,
        scope: &mut v8::HandleScope<'_>,
        value: Option<v8::Local<'_, v8::Value>>,
    ) -> String {
        let Some(value) = value else {
            return UNSERIALIZABLE.to_string();
        };
        if value.is_string() {
            return format!("'{}'", value.to_rust_string_lossy(scope));
        }
        self.string(scope, value)
            .unwrap_or_else(|| UNSERIALIZABLE.to_string())
    }

    /// `Object.prototype.toString.call(value)`.
    fn tag(&self, scope: &mut v8::HandleScope<'_>, value: v8::Local<'_, v8::Value>) -> Option<String> {
        let function = v8::Local::new(scope, &self.object_to_string);
        let tag = function.call(scope, value, &[])?;
        Some(tag.to_rust_string_lossy(scope))
    }

    /// `JSON.stringify(value)`, or `JSON.stringify(value, null, 2)` when `pretty`.
    ///
    /// `Ok(None)` when the result is not a string (e.g. functions, symbols),
    /// `Err(())` when serialization threw.
    fn stringify(
        &self,
        scope: &mut v8::HandleScope<'_>,
        value: v8::Local<'_, v8::Value>,
        pretty: bool,
    ) -> Result<Option<String>, ()> {
        let function = v8::Local::new(scope, &self.stringify);
        let recv = v8::undefined(scope).into();
        let result = if pretty {
            let replacer = v8::null(scope).into();
            let indent = v8::Integer::new(scope, 2).into();
            function.call(scope, recv, &[value, replacer, indent])
        } else {
            function.call(scope, recv, &[value])
        };
        match result {
            Some(json) if json.is_string() => Ok(Some(json.to_rust_string_lossy(scope))),
            Some(_) => Ok(None),
            None => Err(()),
        }
    }

    /// `String(value)`; `None` if conversion threw.
    fn string(&self, scope: &mut v8::HandleScope<'_>, value: v8::Local<'_, v8::Value>) -> Option<String> {
        let function = v8::Local::new(scope, &self.string);
        let recv = v8::undefined(scope).into();
        let result = function.call(scope, recv, &[value])?;
        Some(result.to_rust_string_lossy(scope))
    }
}

/// Look up `object[name]` as an object.
pub(crate) fn get_object<'s>(
    scope: &mut v8::HandleScope<'s>,
    object: v8::Local<'_, v8::Object>,
    name: &str,
) -> Option<v8::Local<'s, v8::Object>> {
    let key = v8::String::new(scope, name)?;
    let value = object.get(scope, key.into())?;
    v8::Local::<v8::Object>::try_from(value).ok()
}

/// Look up `object[name]` as a function.
pub(crate) fn get_function<'s>(
    scope: &mut v8::HandleScope<'s>,
    object: v8::Local<'_, v8::Object>,
    name: &str,
) -> Option<v8::Local<'s, v8::Function>> {
    let key = v8::String::new(scope, name)?;
    let value = object.get(scope, key.into())?;
    v8::Local::<v8::Function>::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use deno_core::{JsRuntime, RuntimeOptions};

    fn format_source(source: &str) -> String {
        let mut runtime = JsRuntime::new(RuntimeOptions::default());
        let scope = &mut runtime.handle_scope();
        let context = scope.get_current_context();
        let global = context.global(scope);
        let formatter = Formatter::capture(scope, global).expect("builtins present");

        let code = v8::String::new(scope, source).unwrap();
        let script = v8::Script::compile(scope, code, None).unwrap();
        let value = script.run(scope).unwrap();
        formatter.format(scope, value)
    }

    #[tokio::test]
    async fn strings_are_printed_raw() {
        assert_eq!(format_source("'Hello, World!'"), "Hello, World!");
    }

    #[tokio::test]
    async fn maps_quote_string_entries() {
        assert_eq!(
            format_source("new Map([['a', 1], [2, 'b']])"),
            "Map(2) { 'a' => 1, 2 => 'b' }"
        );
        assert_eq!(format_source("new Map()"), "Map(0) {  }");
    }

    #[tokio::test]
    async fn sets_quote_string_items() {
        assert_eq!(format_source("new Set(['x', 3])"), "Set(2) { 'x', 3 }");
    }

    #[tokio::test]
    async fn plain_objects_are_pretty_printed() {
        assert_eq!(format_source("({x: 1})"), "{\n  \"x\": 1\n}");
    }

    #[tokio::test]
    async fn arrays_stay_on_one_line() {
        assert_eq!(format_source("[1, 2]"), "[1,2]");
    }

    #[tokio::test]
    async fn scalars_and_fallbacks() {
        assert_eq!(format_source("42"), "42");
        assert_eq!(format_source("null"), "null");
        assert_eq!(format_source("10n"), UNSERIALIZABLE);
        assert_eq!(format_source("(() => { const o = {}; o.o = o; return o; })()"), UNSERIALIZABLE);
    }

    #[tokio::test]
    async fn values_without_json_form_print_empty() {
        assert_eq!(format_source("undefined"), "");
        assert_eq!(format_source("(function named() {})"), "");
        assert_eq!(format_source("Symbol('s')"), "");
    }

    #[tokio::test]
    async fn reassigned_builtins_do_not_change_formatting() {
        let mut runtime = JsRuntime::new(RuntimeOptions::default());
        let scope = &mut runtime.handle_scope();
        let context = scope.get_current_context();
        let global = context.global(scope);
        let formatter = Formatter::capture(scope, global).unwrap();

        let code = v8::String::new(scope, "JSON.stringify = () => 'hijacked'; [1]").unwrap();
        let script = v8::Script::compile(scope, code, None).unwrap();
        let value = script.run(scope).unwrap();
        assert_eq!(formatter.format(scope, value), "[1]");
    }
}
