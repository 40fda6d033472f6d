//! End-to-end tests: packetizer output fed through the receiver, in memory
//! and over a loopback UDP socket.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use h265_rtp::media::nal;
use h265_rtp::media::rtp::{RTP_HEADER_LEN, RtpHeader};
use h265_rtp::{
    AccessUnit, H265Packetizer, NalUnitType, Packetizer, PacketizerConfig, Receiver,
    ReceiverConfig, StreamSender, UdpTransport, receive_loop,
};
use parking_lot::Mutex;

const SSRC: u32 = 0xCAFE_F00D;

fn packetizer() -> H265Packetizer {
    H265Packetizer::with_ssrc(PacketizerConfig::default(), SSRC).unwrap()
}

fn slice(nal_type: u8, len: usize, seed: u8) -> Vec<u8> {
    let mut nal = vec![nal_type << 1, 0x01, 0x80];
    nal.extend((0..len - 3).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)));
    nal
}

fn annex_b(nals: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for nal in nals {
        out.extend_from_slice(&[0, 0, 0, 1]);
        out.extend_from_slice(nal);
    }
    out
}

fn receive_all(packets: &[Vec<u8>]) -> Receiver<Vec<AccessUnit>> {
    let mut receiver = Receiver::new(ReceiverConfig::default(), Vec::new());
    for packet in packets {
        receiver.on_packet_received(packet);
    }
    receiver
}

#[test]
fn small_nal_is_sent_verbatim() {
    let mut p = packetizer();
    let nal = slice(1, 900, 3);
    for marker in [false, true] {
        let packets = p.packetize(&nal, 0, marker).unwrap();
        assert_eq!(packets.len(), 1);
        assert_eq!(&packets[0][RTP_HEADER_LEN..], &nal[..]);
        assert_eq!(RtpHeader::decode(&packets[0]).unwrap().marker, marker);
    }
}

#[test]
fn fragments_concatenate_to_original_payload() {
    let mut p = packetizer();
    let nal = slice(19, 4000, 7);
    let packets = p.packetize(&nal, 0, true).unwrap();
    assert!(packets.len() > 1);

    let mut rebuilt = nal[..2].to_vec();
    for (i, packet) in packets.iter().enumerate() {
        let header = RtpHeader::decode(packet).unwrap();
        let fu_header = packet[RTP_HEADER_LEN + 2];
        let first = i == 0;
        let last = i + 1 == packets.len();
        assert_eq!(fu_header & 0x80 != 0, first, "S bit on packet {}", i);
        assert_eq!(fu_header & 0x40 != 0, last, "E bit on packet {}", i);
        assert_eq!(header.marker, last);
        assert!(packet.len() - RTP_HEADER_LEN <= p.max_payload_size());
        rebuilt.extend_from_slice(&packet[RTP_HEADER_LEN + 3..]);
    }
    assert_eq!(rebuilt, nal);
}

#[test]
fn sequence_numbers_are_contiguous_across_calls() {
    let mut p = packetizer();
    let mut sequences = Vec::new();
    for (i, len) in [10usize, 2500, 1200, 1201, 40].into_iter().enumerate() {
        let packets = p.packetize(&slice(1, len, i as u8), 0, true).unwrap();
        sequences.extend(packets.iter().map(|pk| RtpHeader::decode(pk).unwrap().sequence));
    }
    for pair in sequences.windows(2) {
        assert_eq!(pair[1], pair[0].wrapping_add(1));
    }
}

#[test]
fn single_gap_is_reported_as_loss() {
    let mut p = packetizer();
    let mut packets = Vec::new();
    for frame in 0..6u8 {
        packets.push(annex_b(&[&slice(1, 50, frame)[..]]));
    }
    let mut rtp: Vec<Vec<u8>> = packets
        .iter()
        .flat_map(|frame| p.packetize_frame(frame, 30).unwrap())
        .collect();
    rtp.remove(3);

    let stats = receive_all(&rtp).stats();
    assert_eq!(stats.packets_lost, 1);
    assert_eq!(stats.loss_rate(), 1.0 / (stats.packets_received as f64 + 1.0));
    assert_eq!(stats.access_units_emitted, 5);
}

#[test]
fn large_nal_survives_fragmentation() {
    let mut p = packetizer();
    let nal = slice(19, 3600, 1);
    let packets = p.packetize(&nal, 0, true).unwrap();

    let receiver = receive_all(&packets);
    let aus = receiver.sink();
    assert_eq!(aus.len(), 1);
    assert_eq!(aus[0].nal_units().len(), 1);
    assert_eq!(aus[0].nal_units()[0].as_bytes(), &nal[..]);
}

#[test]
fn parameter_sets_arrive_as_one_access_unit() {
    let vps = [0x40, 0x01, 0x0C, 0x01, 0xFF];
    let sps = [0x42, 0x01, 0x01, 0x01, 0x60];
    let pps = [0x44, 0x01, 0xC1, 0x72];

    let mut p = packetizer();
    let mut packets = Vec::new();
    for (nal, last) in [(&vps[..], false), (&sps[..], false), (&pps[..], true)] {
        packets.extend(p.packetize(nal, 0, last).unwrap());
    }

    let receiver = receive_all(&packets);
    let aus = receiver.sink();
    assert_eq!(aus.len(), 1);
    let got: Vec<&[u8]> = aus[0].nal_units().iter().map(|n| n.as_bytes()).collect();
    assert_eq!(got, vec![&vps[..], &sps[..], &pps[..]]);
    assert!(aus[0].has_parameter_sets());
}

#[test]
fn swapped_packets_keep_arrival_order() {
    let first = slice(1, 20, 1);
    let second = slice(1, 20, 2);
    let third = slice(1, 20, 3);

    let mut p = packetizer();
    let mut packets = Vec::new();
    packets.extend(p.packetize(&first, 0, false).unwrap());
    packets.extend(p.packetize(&second, 0, false).unwrap());
    packets.extend(p.packetize(&third, 0, true).unwrap());
    packets.swap(0, 1);

    let receiver = receive_all(&packets);
    let got: Vec<&[u8]> = receiver.sink()[0]
        .nal_units()
        .iter()
        .map(|n| n.as_bytes())
        .collect();
    // No reorder buffer: NAL #2 precedes NAL #1 because it arrived first.
    assert_eq!(got, vec![&second[..], &first[..], &third[..]]);
}

#[test]
fn annex_b_file_roundtrip() {
    let vps = [0x40, 0x01, 0x0C];
    let sps = [0x42, 0x01, 0x01];
    let pps = [0x44, 0x01, 0xC1];
    let idr = slice(19, 3000, 9);
    let trail = slice(1, 700, 4);
    let stream = annex_b(&[&vps[..], &sps[..], &pps[..], &idr[..], &trail[..]]);

    let units = nal::group_access_units(
        nal::split_annex_b(&stream)
            .into_iter()
            .map(|b| h265_rtp::NalUnit::new(b.to_vec()).unwrap()),
    );
    assert_eq!(units.len(), 2);

    let mut p = packetizer();
    let mut packets = Vec::new();
    for unit in &units {
        let frame: Vec<&[u8]> = unit.iter().map(|n| n.as_bytes()).collect();
        packets.extend(p.packetize_frame(&annex_b(&frame), 30).unwrap());
    }

    let receiver = receive_all(&packets);
    let aus = receiver.sink();
    assert_eq!(aus.len(), 2);
    assert!(aus[0].is_keyframe());
    assert_eq!(aus[1].timestamp.wrapping_sub(aus[0].timestamp), 3000);

    let mut output = Vec::new();
    for au in aus {
        output.extend(au.to_annex_b());
    }
    assert_eq!(output, stream);
    assert_eq!(aus[0].nal_units()[3].nal_type(), NalUnitType::IdrWRadl);
}

#[test]
fn loopback_udp_stream() {
    let rx = UdpTransport::bind("127.0.0.1:0").expect("bind receiver");
    let rx_addr = rx.local_addr().unwrap();

    let (receiver, queue) = Receiver::with_queue(ReceiverConfig::default());
    let receiver = Arc::new(Mutex::new(receiver));
    let running = Arc::new(AtomicBool::new(true));
    let handle = {
        let receiver = receiver.clone();
        let running = running.clone();
        thread::spawn(move || receive_loop(rx, receiver, running))
    };

    let sender =
        StreamSender::connect(packetizer(), "127.0.0.1:0", rx_addr).expect("connect sender");
    let frames: Vec<Vec<u8>> = (0..5u8)
        .map(|i| annex_b(&[&slice(1, 100 + i as usize * 900, i)[..]]))
        .collect();
    for frame in &frames {
        sender.send_frame(frame, 30).expect("send frame");
        thread::sleep(Duration::from_millis(5));
    }

    let mut received = Vec::new();
    while received.len() < frames.len() {
        match queue.pop_timeout(Duration::from_secs(5)) {
            Some(au) => received.push(au),
            None => break,
        }
    }

    running.store(false, Ordering::SeqCst);
    handle.join().unwrap();

    assert_eq!(received.len(), frames.len(), "every frame reassembled");
    for (au, frame) in received.iter().zip(&frames) {
        assert!(au.is_complete());
        assert_eq!(au.ssrc, SSRC);
        assert_eq!(&au.to_annex_b(), frame);
    }
    let stats = receiver.lock().stats();
    assert_eq!(stats.packets_lost, 0);
    assert_eq!(stats.drops.total(), 0);
    assert_eq!(sender.with_packetizer(|p| p.next_rtp_timestamp()), 5 * 3000);
}
