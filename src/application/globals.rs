use visitor_types::Props;

/// Supplies process-wide globals attached to full page loads.
///
/// Globals land in the bootstrap payload, in the render gateway request, and as `var`
/// declarations in the root document.
pub trait GlobalsProvider: Send + Sync {
    fn globals(&self) -> Props;
}

/// Fixed set of globals decided at startup.
#[derive(Debug, Clone, Default)]
pub struct StaticGlobals {
    values: Props,
}

impl StaticGlobals {
    pub fn new(values: Props) -> Self {
        Self { values }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

impl GlobalsProvider for StaticGlobals {
    fn globals(&self) -> Props {
        self.values.clone()
    }
}

/// Whether `name` can be declared as a script global.
pub(crate) fn is_script_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' || first == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}
