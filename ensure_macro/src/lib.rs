/// A macro similar to `assert!` that returns a typed error instead of
/// panicking
///
/// This macro is equivalent to `if !$cond { return Err($err); }` and exists
/// so precondition checks read as a single line at the top of a function.
///
/// ```
/// # use ensure_macro::ensure;
/// #[derive(Debug, PartialEq)]
/// enum CheckError {
///     Empty
/// }
///
/// fn first(values: &[u8]) -> Result<u8, CheckError> {
///     ensure!(!values.is_empty(), CheckError::Empty);
///     Ok(values[0])
/// }
///
/// assert_eq!(first(&[7]), Ok(7));
/// assert_eq!(first(&[]), Err(CheckError::Empty));
/// ```
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $err:expr) => {
        if !$cond {
            return Err($err);
        }
    };
}
