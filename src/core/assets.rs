//! Embedded templates.
//!
//! The Ledger skeleton and the default project configuration are baked into
//! the binary so `gateledger init` and ledger creation need no external files.

macro_rules! embedded_templates {
    ($($path:expr => $const_name:ident),* $(,)?) => {
        $(
            pub const $const_name: &str =
                include_str!(concat!("../../templates/", $path));
        )*
    };
}

embedded_templates! {
    "ledger.md" => LEDGER_TEMPLATE,
    "config.toml" => CONFIG_TEMPLATE,
}
