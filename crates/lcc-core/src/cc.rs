//! `cc_variable_field` constants for CAN-control frames.

pub const RESERVE_ID: u16 = 0x700;
pub const ALIAS_MAP_DEFINITION: u16 = 0x701;
pub const ALIAS_MAPPING_ENQUIRY: u16 = 0x702;
pub const ALIAS_MAP_RESET: u16 = 0x703;
pub const ERROR_INFORMATION_REPORT_LOW: u16 = 0x710;
pub const ERROR_INFORMATION_REPORT_HIGH: u16 = 0x713;

pub const fn is_error_information_report(cc_variable_field: u16) -> bool {
    (ERROR_INFORMATION_REPORT_LOW..=ERROR_INFORMATION_REPORT_HIGH).contains(&cc_variable_field)
}
