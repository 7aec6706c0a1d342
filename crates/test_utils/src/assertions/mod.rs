//! Assertion utilities for testing

/// Assert that two byte arrays are equal
#[macro_export]
macro_rules! assert_bytes_eq {
    ($left:expr, $right:expr) => {
        assert_eq!(::core::convert::AsRef::<[u8]>::as_ref(&$left), ::core::convert::AsRef::<[u8]>::as_ref(&$right));
    };
    ($left:expr, $right:expr, $($arg:tt)+) => {
        assert_eq!(::core::convert::AsRef::<[u8]>::as_ref(&$left), ::core::convert::AsRef::<[u8]>::as_ref(&$right), $($arg)+);
    };
}

/// Assert that a result is OK and unwrap it
#[macro_export]
macro_rules! assert_ok {
    ($expr:expr) => {
        match $expr {
            Ok(val) => val,
            Err(err) => panic!("Expected Ok, got Err: {:?}", err),
        }
    };
    ($expr:expr, $($arg:tt)+) => {
        match $expr {
            Ok(val) => val,
            Err(err) => panic!("Expected Ok, got Err: {:?} ({})", err, format!($($arg)+)),
        }
    };
}

/// Assert that a result is an error and return the error
#[macro_export]
macro_rules! assert_err {
    ($expr:expr) => {
        match $expr {
            Ok(val) => panic!("Expected Err, got Ok: {:?}", val),
            Err(err) => err,
        }
    };
    ($expr:expr, $($arg:tt)+) => {
        match $expr {
            Ok(val) => panic!("Expected Err, got Ok: {:?} ({})", val, format!($($arg)+)),
            Err(err) => err,
        }
    };
}

/// Assert that a sequence is sorted ascending without duplicates
#[macro_export]
macro_rules! assert_strictly_ascending {
    ($seq:expr) => {
        let seq = &$seq;
        for pair in seq.windows(2) {
            assert!(pair[0] < pair[1], "not strictly ascending at {:?}", pair);
        }
    };
}
