/// Generates an open BACnet enumeration: a set of named standard values plus
/// catch-all variants for vendor-proprietary values (inside `$custom_range`)
/// and reserved values (everything else).
///
/// Object types and property identifiers travel on the wire as plain integers
/// and a peer is free to send values this crate has no name for. Decoding must
/// never fail on those, so the generated `From<$unit>` is total.
///
/// # Example
///
/// ```rust
/// use bacnet_mstp_loopback::generate_custom_enum;
///
/// generate_custom_enum! {
///     Colour {
///         Red = 1,
///         Green = 2,
///     },
///     u16,
///     128..=1023
/// }
///
/// assert_eq!(Colour::from(2u16), Colour::Green);
/// assert!(matches!(Colour::from(200u16), Colour::Custom(_)));
/// assert!(matches!(Colour::from(3000u16), Colour::Reserved(_)));
/// assert_eq!(u16::from(Colour::from(200u16)), 200);
/// assert_eq!(Colour::Red.to_string(), "Red");
/// assert!(Colour::Red.is_standard());
/// ```
///
/// # Generated items
///
/// * the enum with the named variants, `Custom(..)` and `Reserved(..)`
/// * a `<Name>Value` newtype carrying the raw value of the catch-all variants
/// * `Display`, `From<$name> for $unit` and `From<$unit> for $name`
/// * `is_standard()` which is true for named variants only
#[macro_export]
macro_rules! generate_custom_enum {
    (
        $(#[$doc:meta])* $name:ident { $($variant:ident = $value:expr,)+ },
        $unit:ident,
        $custom_range:expr
    ) => {
        $crate::__private::pastey::paste! {
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub enum $name {
                $($variant,)*
                Custom( [<$name Value>] ),
                Reserved( [<$name Value>] ),
            }

            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
            pub struct [<$name Value>] { value: $unit }

            impl [<$name Value>] {
                fn new(value: $unit) -> Self {
                    Self { value }
                }

                pub fn value(&self) -> $unit {
                    self.value
                }
            }

            impl $name {
                /// True for values defined by ASHRAE 135, false for proprietary or reserved ones.
                pub fn is_standard(&self) -> bool {
                    !matches!(self, $name::Custom(_) | $name::Reserved(_))
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    match self {
                        $($name::$variant => write!(f, "{}", stringify!($variant)),)*
                        $name::Custom( value ) => write!(f, "Custom({})", value.value()),
                        $name::Reserved( value ) => write!(f, "Reserved({})", value.value()),
                    }
                }
            }

            impl From<$name> for $unit {
                fn from(value: $name) -> Self {
                    match value {
                        $($name::$variant => $value,)*
                        $name::Custom( value ) => value.value(),
                        $name::Reserved( value ) => value.value(),
                    }
                }
            }

            impl From<$unit> for $name {
                fn from(value: $unit) -> Self {
                    match value {
                        $($value => $name::$variant,)*
                        v if ($custom_range).contains(&v) => {
                            $name::Custom( [<$name Value>]::new(v) )
                        }
                        v => $name::Reserved( [<$name Value>]::new(v) ),
                    }
                }
            }
        }
    };
}
