/// Return a shortened version of the function name.
#[macro_export]
macro_rules! short_function {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            core::any::type_name::<T>()
        }
        let name = type_name_of(f);

        // Find and cut the rest of the path
        match &name[..name.len() - 3].rfind(':') {
            Some(pos) => &name[pos + 1..name.len() - 3],
            None => &name[..name.len() - 3],
        }
    }};
}

/// Log bytes as hex
#[macro_export]
macro_rules! log_bytes {
    ($obj: expr) => {
        $crate::util::debug_utils::DebugBytes(&$obj)
    };
}

/// Trace entry into a search stage, with its parameters
#[macro_export]
macro_rules! trace_stage {
    ($stage:expr, $( $x:expr ),* ) => {
        if ::log::log_enabled!(::log::Level::Trace) {
            let mut buffer = String::new();
            $(
                if buffer.len() > 0 {
                    buffer.push_str(", ");
                }
                buffer.push_str(&format!("{}: {:?}", stringify!($x), $x)[..]);
            )*
            ::log::trace!("{} {}: {}", $crate::short_function!(), $stage, buffer);
        }
    };
}
