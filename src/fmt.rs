//! Logging shim. With the `defmt` feature the macros forward to `defmt`;
//! without it they compile to nothing, so host tests link without a global
//! logger. Call sites stay identical either way.

#![allow(unused_macros)]

macro_rules! trace {
    ($s:literal $(, $arg:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::trace!($s $(, $arg)*);
            #[cfg(not(feature = "defmt"))]
            { $( let _ = &$arg; )* }
        }
    };
}

macro_rules! debug {
    ($s:literal $(, $arg:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::debug!($s $(, $arg)*);
            #[cfg(not(feature = "defmt"))]
            { $( let _ = &$arg; )* }
        }
    };
}

macro_rules! info {
    ($s:literal $(, $arg:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::info!($s $(, $arg)*);
            #[cfg(not(feature = "defmt"))]
            { $( let _ = &$arg; )* }
        }
    };
}

macro_rules! warn_ {
    ($s:literal $(, $arg:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::warn!($s $(, $arg)*);
            #[cfg(not(feature = "defmt"))]
            { $( let _ = &$arg; )* }
        }
    };
}

macro_rules! error {
    ($s:literal $(, $arg:expr)* $(,)?) => {
        {
            #[cfg(feature = "defmt")]
            ::defmt::error!($s $(, $arg)*);
            #[cfg(not(feature = "defmt"))]
            { $( let _ = &$arg; )* }
        }
    };
}

#[allow(unused_imports)]
pub(crate) use {debug, error, info, trace, warn_ as warn};
