//! Deterministic built-in plan used when the planner cannot supply one.
//!
//! Pure and infallible: the same [`BuildContext`] always yields a
//! byte-identical [`Plan`]. Context values are templated into the commands
//! here, shell-quoted, so the executor never has to interpret them.

use crate::domain::{BuildContext, Plan, Stage};

pub const ANNOUNCE_STAGE: &str = "Announce Context";
pub const INSTALL_STAGE: &str = "Install Dependencies";
pub const BUILD_STAGE: &str = "Build";
pub const TEST_STAGE: &str = "Test";

/// Build the fallback plan for `ctx`.
pub fn fallback_plan(ctx: &BuildContext) -> Plan {
    let label = format!(
        "{}@{} (build #{})",
        ctx.repository_name, ctx.branch, ctx.build_number
    );

    Plan::new(vec![
        Stage::new(
            ANNOUNCE_STAGE,
            format!("echo {}", shell_quote(&format!("Fallback plan for {label}"))),
        ),
        Stage::new(
            INSTALL_STAGE,
            format!(
                "if [ -f package-lock.json ]; then npm ci; \
                 elif [ -f package.json ]; then npm install; \
                 else echo {}; fi",
                shell_quote(&format!("{label}: no package.json, skipping dependency install"))
            ),
        ),
        Stage::new(
            BUILD_STAGE,
            format!(
                "if [ -f package.json ]; then npm run build --if-present; else echo {}; fi",
                shell_quote(&format!("{label}: no build step defined, skipping"))
            ),
        ),
        Stage::new(
            TEST_STAGE,
            format!(
                "if [ -f package.json ]; then npm run test --if-present; else echo {}; fi",
                shell_quote(&format!("{label}: no tests defined, skipping"))
            ),
        ),
    ])
}

/// Single-quote `value` for POSIX `sh`.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
