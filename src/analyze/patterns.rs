//! Classification pattern tables and the built-in component registry.
//!
//! The heuristic tables are ordered sequences, not maps: the categories
//! are not mutually exclusive at the string level, and evaluation order
//! encodes real collision constraints. Two that matter in practice:
//!
//! * the TCP/IP-stack entry must precede the libc entry, because DHCP
//!   routines (`dhcp_select`) would otherwise match libc's `select`;
//! * the mDNS entry must precede the Bluetooth entry, because every
//!   `..._disable` function contains the substring `ble`.
//!
//! First match wins; reordering these tables changes attributions.

/// C++ namespace all first-party firmware code lives in.
pub const CORE_NAMESPACE: &str = "esphome::";

/// Reserved prefix of compiler-generated switch dispatch tables.
pub const CSWTCH_PREFIX: &str = "CSWTCH$";

/// Built-in component names the classifier recognizes inside the core
/// namespace. Externally-declared components are supplied per run on top
/// of this registry.
pub const KNOWN_COMPONENTS: &[&str] = &[
    "api",
    "binary_sensor",
    "bluetooth_proxy",
    "button",
    "captive_portal",
    "climate",
    "cover",
    "debug",
    "deep_sleep",
    "display",
    "esp32",
    "esp32_ble",
    "esp32_ble_tracker",
    "esp32_camera",
    "esp8266",
    "ethernet",
    "fan",
    "globals",
    "http_request",
    "i2c",
    "improv_serial",
    "interval",
    "json",
    "light",
    "lock",
    "logger",
    "md5",
    "mdns",
    "mqtt",
    "network",
    "number",
    "ota",
    "output",
    "preferences",
    "prometheus",
    "psram",
    "restart",
    "safe_mode",
    "script",
    "select",
    "sensor",
    "socket",
    "spi",
    "status_led",
    "switch",
    "text",
    "text_sensor",
    "time",
    "uart",
    "update",
    "uptime",
    "valve",
    "web_server",
    "web_server_base",
    "wifi",
    "wifi_signal",
    "wireguard",
];

pub fn is_known_component(name: &str) -> bool {
    KNOWN_COMPONENTS.contains(&name)
}

/// Ordered heuristic table matched against the raw (mangled) symbol name.
pub const RAW_SYMBOL_PATTERNS: &[(&str, &[&str])] = &[
    (
        "lwip",
        &[
            "dhcp", "lwip_", "tcpip_", "tcp_", "udp_", "pbuf_", "netif_", "ip4_", "ip6_",
            "dns_", "etharp_", "igmp_", "raw_sendto", "sys_timeout",
        ],
    ),
    ("mdns_lib", &["mdns"]),
    (
        "wifi_stack",
        &[
            "ieee80211", "hostap", "esp_wifi", "wpa_", "wps_", "wifi_", "lmac", "wdev",
            "ppTask", "sta_scan", "ap_probe",
        ],
    ),
    (
        "bt",
        &[
            "bt_", "ble", "l2c_", "l2cu_", "l2ca_", "gatt", "gap_", "hci_", "btm_", "smp_",
            "nimble",
        ],
    ),
    (
        "phy",
        &[
            "phy_", "rf_init", "chip_v7", "register_chipv7", "bb_init", "ram_txbbgain",
            "txpwr",
        ],
    ),
    (
        "freertos",
        &[
            "xTask", "vTask", "uxTask", "xQueue", "vQueue", "uxQueue", "xTimer", "prvTimer",
            "xEvent", "pvPort", "vPort", "xPort", "vList", "uxList", "xRingbuffer",
        ],
    ),
    (
        "newlib",
        &[
            "_dtoa", "_mprec", "__ssprint", "__sflush", "__sfvwrite", "_svfprintf",
            "_vfprintf", "_vfiprintf", "strtod", "_localeconv", "__global_locale",
        ],
    ),
    (
        "mbedtls",
        &[
            "mbedtls", "sha1_", "sha256_", "sha512_", "aes_", "rsa_", "ecp_", "bignum",
            "x509",
        ],
    ),
    (
        "libc",
        &[
            "memcpy", "memset", "memmove", "memcmp", "strcmp", "strncmp", "strcpy",
            "strncpy", "strlen", "strstr", "select", "malloc", "free", "realloc", "calloc",
            "qsort", "atoi", "strtol", "__udivdi3", "__divdi3", "__umoddi3",
        ],
    ),
    (
        "esp_idf",
        &[
            "esp_", "nvs_", "uart_", "gpio_", "rtc_", "i2c_hal", "ledc_", "timer_group",
            "periph_", "heap_caps", "multi_heap", "xt_",
        ],
    ),
];

/// Ordered heuristic table matched against the demangled symbol name.
pub const DEMANGLED_SYMBOL_PATTERNS: &[(&str, &[&str])] = &[
    (
        "libstdcpp",
        &[
            "std::", "__gnu_cxx::", "operator new", "operator delete", "__cxa", "__cxxabi",
        ],
    ),
    (
        "rtti",
        &[
            "vtable for ", "typeinfo for ", "typeinfo name for ", "VTT for ",
            "guard variable for ",
        ],
    ),
];

/// Iterate every heuristic category name, raw table first, preserving
/// declaration order.
pub fn heuristic_categories() -> impl Iterator<Item = &'static str> {
    RAW_SYMBOL_PATTERNS
        .iter()
        .map(|(cat, _)| *cat)
        .chain(DEMANGLED_SYMBOL_PATTERNS.iter().map(|(cat, _)| *cat))
}

/// CamelCase a snake_case component name (`text_sensor` -> `TextSensor`).
pub fn camel_case(name: &str) -> String {
    name.split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// The four generated class-name variants for a component: literal,
/// ESPHome-prefixed, camel-cased, and ESPHome-prefixed camel-cased, each
/// suffixed `Component`. Matched case-insensitively so acronym-cased
/// classes (`ESPHomeOTAComponent`) resolve to their component.
pub fn component_class_variants(name: &str) -> [String; 4] {
    let camel = camel_case(name);
    [
        format!("{name}Component"),
        format!("ESPHome{name}Component"),
        format!("{camel}Component"),
        format!("ESPHome{camel}Component"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camel_case_joins_parts() {
        assert_eq!(camel_case("wifi"), "Wifi");
        assert_eq!(camel_case("text_sensor"), "TextSensor");
        assert_eq!(camel_case("esp32_ble_tracker"), "Esp32BleTracker");
    }

    #[test]
    fn class_variants_cover_prefix_and_camel_forms() {
        let v = component_class_variants("ota");
        assert_eq!(v[0], "otaComponent");
        assert_eq!(v[1], "ESPHomeotaComponent");
        assert_eq!(v[2], "OtaComponent");
        assert_eq!(v[3], "ESPHomeOtaComponent");
    }

    #[test]
    fn lwip_precedes_libc() {
        let lwip_pos = RAW_SYMBOL_PATTERNS
            .iter()
            .position(|(c, _)| *c == "lwip")
            .unwrap();
        let libc_pos = RAW_SYMBOL_PATTERNS
            .iter()
            .position(|(c, _)| *c == "libc")
            .unwrap();
        assert!(lwip_pos < libc_pos);
    }

    #[test]
    fn mdns_precedes_bluetooth() {
        let mdns_pos = RAW_SYMBOL_PATTERNS
            .iter()
            .position(|(c, _)| *c == "mdns_lib")
            .unwrap();
        let bt_pos = RAW_SYMBOL_PATTERNS
            .iter()
            .position(|(c, _)| *c == "bt")
            .unwrap();
        assert!(mdns_pos < bt_pos);
    }

    #[test]
    fn known_component_lookup() {
        assert!(is_known_component("wifi"));
        assert!(is_known_component("web_server_base"));
        assert!(!is_known_component("my_custom_plugin"));
    }
}
