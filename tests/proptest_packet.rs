use std::net::SocketAddrV6;

use proptest::prelude::*;

use sixlease::{Config, Engine, Header, MemoryStore, MessageType, OptionCode, Writer};

const HEADER_LEN: usize = 4;

fn valid_header() -> Vec<u8> {
    vec![MessageType::Solicit as u8, 0xaa, 0xbb, 0xcc]
}

fn test_engine() -> Engine {
    let config = Config::default();
    let store = Box::new(MemoryStore::new(config.store_capacity));
    Engine::new(&config, store).unwrap()
}

fn peer() -> SocketAddrV6 {
    "[fe80::1]:546".parse().unwrap()
}

/// Walks every option in a payload, recursing one level into IA bodies
/// the way the engine does.
fn walk_options(data: &[u8]) -> Result<(), sixlease::Error> {
    let (_, mut options) = Header::parse(data)?;
    while let Some(view) = options.next_option()? {
        if view.code == OptionCode::IaNa as u16 || view.code == OptionCode::IaPd as u16 {
            let mut body = view.reader();
            while let Some(_inner) = body.next_option()? {}
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10000))]

    #[test]
    fn parse_never_panics_on_arbitrary_bytes(data: Vec<u8>) {
        let _ = walk_options(&data);
    }

    #[test]
    fn parse_never_panics_on_valid_header_with_random_options(
        options_data in prop::collection::vec(any::<u8>(), 0..512)
    ) {
        let mut packet = valid_header();
        packet.extend_from_slice(&options_data);
        let _ = walk_options(&packet);
    }

    #[test]
    fn parse_never_panics_on_random_option_lengths(
        option_code in any::<u16>(),
        option_length in any::<u16>(),
        option_data in prop::collection::vec(any::<u8>(), 0..256)
    ) {
        let mut packet = valid_header();
        packet.extend_from_slice(&option_code.to_be_bytes());
        packet.extend_from_slice(&option_length.to_be_bytes());
        let actual_len = (option_length as usize).min(option_data.len());
        packet.extend_from_slice(&option_data[..actual_len]);
        let _ = walk_options(&packet);
    }

    #[test]
    fn engine_never_panics_on_arbitrary_bytes(data: Vec<u8>) {
        let mut engine = test_engine();
        let _ = engine.handle_packet(&data, peer(), 1);
    }

    #[test]
    fn engine_never_panics_on_plausible_packets(
        msg_type in 0u8..16,
        options_data in prop::collection::vec(any::<u8>(), 0..256)
    ) {
        let mut packet = vec![msg_type, 1, 2, 3];
        packet.extend_from_slice(&options_data);
        let mut engine = test_engine();
        let _ = engine.handle_packet(&packet, peer(), 1);
    }

    #[test]
    fn engine_never_panics_on_corrupted_solicit(
        duid in prop::collection::vec(any::<u8>(), 1..64),
        iaid in any::<u32>(),
        corruption_index in 0usize..64,
        corruption_value in any::<u8>(),
    ) {
        let mut w = Writer::new(512);
        w.write_header(MessageType::Solicit as u8, [1, 2, 3]).unwrap();
        let mark = w.begin_option(OptionCode::ClientId as u16).unwrap();
        w.write_bytes(&duid).unwrap();
        w.end_option(mark).unwrap();
        let mark = w.begin_option(OptionCode::IaNa as u16).unwrap();
        w.write_u32(iaid).unwrap();
        w.write_u32(0).unwrap();
        w.write_u32(0).unwrap();
        w.end_option(mark).unwrap();

        let mut packet = w.into_payload();
        if corruption_index < packet.len() {
            packet[corruption_index] = corruption_value;
        }
        let mut engine = test_engine();
        let _ = engine.handle_packet(&packet, peer(), 1);
    }

    #[test]
    fn writer_roundtrips_options(
        code in 1u16..=u16::MAX,
        value in prop::collection::vec(any::<u8>(), 0..256)
    ) {
        let mut w = Writer::new(1024);
        w.write_header(MessageType::Reply as u8, [7, 8, 9]).unwrap();
        let mark = w.begin_option(code).unwrap();
        w.write_bytes(&value).unwrap();
        w.end_option(mark).unwrap();

        let payload = w.into_payload();
        let (header, mut options) = Header::parse(&payload).unwrap();
        prop_assert_eq!(header.msg_type, MessageType::Reply as u8);
        prop_assert_eq!(header.txid, [7, 8, 9]);

        let view = options.next_option().unwrap().unwrap();
        prop_assert_eq!(view.code, code);
        prop_assert_eq!(view.value, value.as_slice());
        prop_assert!(options.next_option().unwrap().is_none());
    }

    #[test]
    fn replies_always_parse(
        duid in prop::collection::vec(any::<u8>(), 1..64),
        iaid in any::<u32>(),
        msg_type in prop::sample::select(vec![
            MessageType::Solicit,
            MessageType::Request,
            MessageType::Renew,
            MessageType::Rebind,
            MessageType::Confirm,
            MessageType::InformationRequest,
        ]),
    ) {
        let mut w = Writer::new(512);
        w.write_header(msg_type as u8, [4, 5, 6]).unwrap();
        let mark = w.begin_option(OptionCode::ClientId as u16).unwrap();
        w.write_bytes(&duid).unwrap();
        w.end_option(mark).unwrap();
        let mark = w.begin_option(OptionCode::IaNa as u16).unwrap();
        w.write_u32(iaid).unwrap();
        w.write_u32(0).unwrap();
        w.write_u32(0).unwrap();
        w.end_option(mark).unwrap();

        let mut engine = test_engine();
        if let Some(outbound) = engine.handle_packet(&w.into_payload(), peer(), 1) {
            prop_assert!(outbound.payload.len() >= HEADER_LEN);
            prop_assert!(walk_options(&outbound.payload).is_ok());
            let (header, _) = Header::parse(&outbound.payload).unwrap();
            prop_assert_eq!(header.txid, [4, 5, 6]);
        }
    }

    #[test]
    fn short_packets_always_rejected(
        data in prop::collection::vec(any::<u8>(), 0..HEADER_LEN)
    ) {
        prop_assert!(Header::parse(&data).is_err());
    }

    #[test]
    fn truncated_options_always_rejected(
        code in any::<u16>(),
        declared_len in 1u16..=u16::MAX,
        short_by in 1usize..8,
    ) {
        let mut packet = valid_header();
        packet.extend_from_slice(&code.to_be_bytes());
        packet.extend_from_slice(&declared_len.to_be_bytes());
        let actual = (declared_len as usize).saturating_sub(short_by);
        packet.extend_from_slice(&vec![0u8; actual]);

        prop_assert!(walk_options(&packet).is_err());
    }
}
