//! Protocol constants for netlink, generic netlink and devlink.
//!
//! Derived from `linux/netlink.h`, `linux/genetlink.h` and `linux/devlink.h`.

// ============================================================================
// Netlink transport
// ============================================================================

/// Generic netlink protocol number for `socket(AF_NETLINK, SOCK_RAW, ...)`.
pub const NETLINK_GENERIC: i32 = 16;

/// Socket option level for netlink options.
pub const SOL_NETLINK: i32 = 270;
pub const NETLINK_ADD_MEMBERSHIP: i32 = 1;
pub const NETLINK_CAP_ACK: i32 = 10;
pub const NETLINK_EXT_ACK: i32 = 11;

/// Netlink message alignment (NLMSG_ALIGNTO / NLA_ALIGNTO).
pub const NL_ALIGNTO: usize = 4;

/// Size of `struct nlmsghdr`.
pub const NLMSG_HDRLEN: usize = 16;
/// Size of `struct genlmsghdr`.
pub const GENL_HDRLEN: usize = 4;
/// Size of `struct nlattr`.
pub const NLA_HDRLEN: usize = 4;

/// Receive buffer size used by libmnl (`MNL_SOCKET_BUFFER_SIZE`).
pub const SOCKET_BUFFER_SIZE: usize = 8192;

// Standard message types
pub const NLMSG_NOOP: u16 = 0x1;
pub const NLMSG_ERROR: u16 = 0x2;
pub const NLMSG_DONE: u16 = 0x3;
pub const NLMSG_OVERRUN: u16 = 0x4;
/// Types below this value are reserved control messages.
pub const NLMSG_MIN_TYPE: u16 = 0x10;

// Request flags
pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_MULTI: u16 = 0x02;
pub const NLM_F_ACK: u16 = 0x04;
pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

// Acknowledgment flags (on NLMSG_ERROR)
pub const NLM_F_CAPPED: u16 = 0x100;
pub const NLM_F_ACK_TLVS: u16 = 0x200;

/// Nested attribute flag in `nla_type`.
pub const NLA_F_NESTED: u16 = 1 << 15;
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

// Extended ACK attributes (enum nlmsgerr_attrs)
pub const NLMSGERR_ATTR_MSG: u16 = 1;
pub const NLMSGERR_ATTR_OFFS: u16 = 2;
pub const NLMSGERR_ATTR_COOKIE: u16 = 3;
pub const NLMSGERR_ATTR_MAX: u16 = NLMSGERR_ATTR_COOKIE;

// ============================================================================
// Generic netlink controller
// ============================================================================

pub const GENL_ID_CTRL: u16 = NLMSG_MIN_TYPE;
pub const CTRL_VERSION: u8 = 1;

pub const CTRL_CMD_GETFAMILY: u8 = 3;

pub const CTRL_ATTR_FAMILY_ID: u16 = 1;
pub const CTRL_ATTR_FAMILY_NAME: u16 = 2;
pub const CTRL_ATTR_VERSION: u16 = 3;
pub const CTRL_ATTR_HDRSIZE: u16 = 4;
pub const CTRL_ATTR_MAXATTR: u16 = 5;
pub const CTRL_ATTR_OPS: u16 = 6;
pub const CTRL_ATTR_MCAST_GROUPS: u16 = 7;
pub const CTRL_ATTR_MAX: u16 = CTRL_ATTR_MCAST_GROUPS;

pub const CTRL_ATTR_MCAST_GRP_NAME: u16 = 1;
pub const CTRL_ATTR_MCAST_GRP_ID: u16 = 2;
pub const CTRL_ATTR_MCAST_GRP_MAX: u16 = CTRL_ATTR_MCAST_GRP_ID;

// ============================================================================
// Devlink family
// ============================================================================

pub const DEVLINK_GENL_NAME: &str = "devlink";
pub const DEVLINK_GENL_VERSION: u8 = 1;
pub const DEVLINK_GENL_MCGRP_CONFIG_NAME: &str = "config";

/// Family id used by emulated sockets, which never talk to the controller.
pub const EMULATED_FAMILY_ID: u16 = 0xFFFF;

// Commands (enum devlink_command)
pub const DEVLINK_CMD_GET: u8 = 1;
pub const DEVLINK_CMD_SET: u8 = 2;
pub const DEVLINK_CMD_NEW: u8 = 3;
pub const DEVLINK_CMD_DEL: u8 = 4;
pub const DEVLINK_CMD_RELOAD: u8 = 37;
pub const DEVLINK_CMD_INFO_GET: u8 = 51;
pub const DEVLINK_CMD_FLASH_UPDATE: u8 = 58;
pub const DEVLINK_CMD_FLASH_UPDATE_END: u8 = 59;
pub const DEVLINK_CMD_FLASH_UPDATE_STATUS: u8 = 60;

// Attributes (enum devlink_attr)
pub const DEVLINK_ATTR_BUS_NAME: u16 = 1;
pub const DEVLINK_ATTR_DEV_NAME: u16 = 2;
pub const DEVLINK_ATTR_INFO_DRIVER_NAME: u16 = 98;
pub const DEVLINK_ATTR_INFO_SERIAL_NUMBER: u16 = 99;
pub const DEVLINK_ATTR_INFO_VERSION_FIXED: u16 = 100;
pub const DEVLINK_ATTR_INFO_VERSION_RUNNING: u16 = 101;
pub const DEVLINK_ATTR_INFO_VERSION_STORED: u16 = 102;
pub const DEVLINK_ATTR_INFO_VERSION_NAME: u16 = 103;
pub const DEVLINK_ATTR_INFO_VERSION_VALUE: u16 = 104;
pub const DEVLINK_ATTR_FLASH_UPDATE_FILE_NAME: u16 = 122;
pub const DEVLINK_ATTR_FLASH_UPDATE_COMPONENT: u16 = 123;
pub const DEVLINK_ATTR_FLASH_UPDATE_STATUS_MSG: u16 = 124;
pub const DEVLINK_ATTR_FLASH_UPDATE_STATUS_DONE: u16 = 125;
pub const DEVLINK_ATTR_FLASH_UPDATE_STATUS_TOTAL: u16 = 126;
pub const DEVLINK_ATTR_INFO_BOARD_SERIAL_NUMBER: u16 = 146;
pub const DEVLINK_ATTR_FLASH_UPDATE_STATUS_TIMEOUT: u16 = 151;
pub const DEVLINK_ATTR_RELOAD_ACTION: u16 = 153;

/// Highest attribute type this implementation knows about. Anything above is
/// skipped on decode so newer kernels keep working.
pub const DEVLINK_ATTR_MAX: u16 = 200;

// Reload actions (enum devlink_reload_action)
pub const DEVLINK_RELOAD_ACTION_DRIVER_REINIT: u8 = 1;
pub const DEVLINK_RELOAD_ACTION_FW_ACTIVATE: u8 = 2;

/// Human readable devlink command name, used for event keys and logs.
pub fn devlink_cmd_name(cmd: u8) -> &'static str {
    match cmd {
        DEVLINK_CMD_GET => "GET",
        DEVLINK_CMD_SET => "SET",
        DEVLINK_CMD_NEW => "NEW",
        DEVLINK_CMD_DEL => "DEL",
        DEVLINK_CMD_RELOAD => "RELOAD",
        DEVLINK_CMD_INFO_GET => "INFO_GET",
        DEVLINK_CMD_FLASH_UPDATE => "FLASH_UPDATE",
        DEVLINK_CMD_FLASH_UPDATE_END => "FLASH_UPDATE_END",
        DEVLINK_CMD_FLASH_UPDATE_STATUS => "FLASH_UPDATE_STATUS",
        _ => "UNKNOWN",
    }
}

/// Round `len` up to the netlink alignment unit.
pub const fn nl_align(len: usize) -> usize {
    (len + NL_ALIGNTO - 1) & !(NL_ALIGNTO - 1)
}
