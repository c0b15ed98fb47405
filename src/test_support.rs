//! Helpers shared by unit tests

/// Whether `name` resolves to an executable on `PATH`.
///
/// Checked without spawning anything, so it never disturbs pid tracking.
pub fn have_program(name: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|p| p.join(name).is_file()))
        .unwrap_or(false)
}
