use globset::{
    Glob,
    GlobSet,
    GlobSetBuilder,
};

use super::error::UtilError;

/// Compiles tool name patterns such as `filesystem--*` or `get_?ime` into one matcher.
pub fn compile_patterns<T, U>(patterns: T) -> Result<GlobSet, UtilError>
where
    T: IntoIterator<Item = U>,
    U: AsRef<str>,
{
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern.as_ref())?);
    }
    Ok(builder.build()?)
}
