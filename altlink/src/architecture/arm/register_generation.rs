//! Helper macro to turn a bitfield newtype into a DAP register.

/// Implements the raw conversions and [`Register`](super::Register) for a `bitfield!` newtype.
///
/// Takes
/// - name: the bitfield type.
/// - address: the register address. For AP registers this includes the bank nibble.
/// - display: the name used in log output.
macro_rules! register {
    ($name:ident, $address:expr, $display:expr) => {
        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                $name(raw)
            }
        }

        impl From<$name> for u32 {
            fn from(register: $name) -> Self {
                register.0
            }
        }

        impl $crate::architecture::arm::Register for $name {
            const ADDRESS: u8 = $address;
            const NAME: &'static str = $display;
        }
    };
}

/// Implements the raw conversions and
/// [`DebugRegister`](crate::architecture::arm::component::DebugRegister) for a `bitfield!`
/// newtype living at `offset` from the base of a debug unit.
macro_rules! debug_register {
    ($name:ident, $offset:expr, $display:expr) => {
        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                $name(raw)
            }
        }

        impl From<$name> for u32 {
            fn from(register: $name) -> Self {
                register.0
            }
        }

        impl $crate::architecture::arm::component::DebugRegister for $name {
            const ADDRESS: u32 = $offset;
            const NAME: &'static str = $display;
        }
    };
}
