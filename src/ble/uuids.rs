//! BLE Service and Characteristic UUIDs.
//!
//! These match the GATT table flashed on the lamp's ESP32 firmware.

use uuid::Uuid;

// Lamp Service (custom)
/// Main lamp service UUID. Also used as the scan filter.
pub const LAMP_SERVICE_UUID: Uuid = Uuid::from_u128(0x795090c7_420d_4048_a24e_18e60180e23c);
/// Toggle LED characteristic UUID (Write). Writing `"1"` flips the LED.
pub const TOGGLE_LED_UUID: Uuid = Uuid::from_u128(0x59b6bf7f_44de_4184_81bd_a0e3b30c919b);
/// LED state characteristic UUID (Notify). Sends `"1"` or `"0"`.
pub const LED_STATE_UUID: Uuid = Uuid::from_u128(0xd75167c8_e6f9_4f0b_b688_09d96e195f00);
/// Toggle counter characteristic UUID (Read).
pub const GET_COUNT_UUID: Uuid = Uuid::from_u128(0xa877d87f_60bf_4ad5_ba61_56133b2cd9d4);
/// Wi-Fi configuration characteristic UUID (Read, Write).
pub const WIFI_CONFIG_UUID: Uuid = Uuid::from_u128(0x10f83060_64f8_11ee_8c99_0242ac120002);
/// Advertised device name characteristic UUID (Write).
pub const DEVICE_NAME_UUID: Uuid = Uuid::from_u128(0x1497b8a8_64f8_11ee_8c99_0242ac120002);

// Standard descriptors
/// Client Characteristic Configuration Descriptor UUID.
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);

/// Check if a service UUID is the lamp service.
pub fn is_lamp_service(uuid: &Uuid) -> bool {
    *uuid == LAMP_SERVICE_UUID
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            LAMP_SERVICE_UUID.to_string(),
            "795090c7-420d-4048-a24e-18e60180e23c"
        );
        assert_eq!(
            TOGGLE_LED_UUID.to_string(),
            "59b6bf7f-44de-4184-81bd-a0e3b30c919b"
        );
        assert!(CCCD_UUID.to_string().contains("2902"));
    }

    #[test]
    fn test_is_lamp_service() {
        assert!(is_lamp_service(&LAMP_SERVICE_UUID));
        assert!(!is_lamp_service(&TOGGLE_LED_UUID));
        assert!(!is_lamp_service(&CCCD_UUID));
    }
}
