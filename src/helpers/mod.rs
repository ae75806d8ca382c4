pub(crate) mod hash_helpers;
pub(crate) mod math_helpers;
pub(crate) mod set_helpers;
