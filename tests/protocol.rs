use fcaccel::accel::{pack_word, BlockLimits, ChannelState, CommandChannel, CommandLog, Opcode, SimulatedAccelerator};
use fcaccel::error::ChannelError;
use fcaccel::kernel::offload::fully_connected_offloaded;
use fcaccel::{FullyConnectedParams, KernelError, RuntimeShape};

#[test]
fn exact_command_stream_for_one_batch() {
    // 5 channels x 3 depth: two channel groups, the second padded with zero rows
    let filter: Vec<i8> = (1..=15).collect();
    let input = [-1i8, 2, -3];
    let p = FullyConnectedParams { input_offset: -1, ..Default::default() };
    let mut log = CommandLog::new(SimulatedAccelerator::default());
    let mut out = [0i8; 5];
    fully_connected_offloaded(&p, &mut log, &RuntimeShape::new(&[1, 3]), &input, &RuntimeShape::new(&[5, 3]), &filter, None, &RuntimeShape::new(&[1, 5]), &mut out).unwrap();

    let cmds = log.entries();
    assert_eq!(cmds.len(), 6 + 3 + 1 + 1 + 5);
    let ops: Vec<Opcode> = cmds.iter().map(|c| c.opcode).collect();
    let mut expected = vec![Opcode::LoadWeight; 6];
    expected.extend([Opcode::LoadInput; 3]);
    expected.push(Opcode::Configure);
    expected.push(Opcode::Trigger);
    expected.extend([Opcode::ReadResult; 5]);
    assert_eq!(ops, expected);

    // rows: c0=[1,2,3] c1=[4,5,6] c2=[7,8,9] c3=[10,11,12] c4=[13,14,15]
    assert_eq!(cmds[0].payload, pack_word(1, 4, 7, 10));
    assert_eq!(cmds[2].payload, pack_word(3, 6, 9, 12));
    assert_eq!(cmds[3].payload, pack_word(13, 0, 0, 0));
    assert_eq!(cmds[5].payload, pack_word(15, 0, 0, 0));
    for (i, c) in cmds[..6].iter().enumerate() { assert_eq!(c.aux, i as u32); }

    assert_eq!(cmds[6].payload, pack_word(-1, 0, 0, 0));
    assert_eq!(cmds[8].payload, pack_word(-3, 0, 0, 0));
    assert_eq!(cmds[8].aux, 2);

    let cfg = cmds[9];
    assert_eq!(cfg.payload, pack_word(0, 3, 5, 1));
    assert_eq!(cfg.aux, 0xFFFF_FFFF);

    for (i, c) in cmds[11..].iter().enumerate() {
        assert_eq!(c.aux, i as u32);
        assert_eq!(c.response as i32, out[i] as i32, "unit scale passes raw accumulators through");
    }
    assert_eq!(log.inner().state(), ChannelState::Idle);
}

/// Accepts every command but fails TRIGGER, like a device that rejects the block.
struct FailingTrigger(SimulatedAccelerator);

impl CommandChannel for FailingTrigger {
    fn limits(&self) -> BlockLimits { self.0.limits() }

    fn request(&mut self, opcode: Opcode, payload: u32, aux: u32) -> Result<u32, ChannelError> {
        if opcode == Opcode::Trigger {
            return Err(ChannelError::ProtocolViolation { opcode, state: self.0.state() });
        }
        self.0.request(opcode, payload, aux)
    }
}

#[test]
fn channel_errors_abort_the_kernel() {
    let mut ch = FailingTrigger(SimulatedAccelerator::default());
    let mut out = [0i8; 1];
    let err = fully_connected_offloaded(&FullyConnectedParams::default(), &mut ch, &RuntimeShape::new(&[1, 1]), &[1], &RuntimeShape::new(&[1, 1]), &[1], None, &RuntimeShape::new(&[1, 1]), &mut out).unwrap_err();
    assert!(matches!(err, KernelError::Channel(ChannelError::ProtocolViolation { opcode: Opcode::Trigger, .. })));
}

#[test]
fn device_limits_drive_capacity_checks() {
    let mut dev = SimulatedAccelerator::new(BlockLimits { max_channels: 4, max_depth: 64 });
    let mut out = [0i8; 5];
    let err = fully_connected_offloaded(&FullyConnectedParams::default(), &mut dev, &RuntimeShape::new(&[1, 2]), &[1, 1], &RuntimeShape::new(&[5, 2]), &[1; 10], None, &RuntimeShape::new(&[1, 5]), &mut out).unwrap_err();
    assert_eq!(err, KernelError::TileTooLarge { channels: 5, depth: 2, max_channels: 4, max_depth: 64 });
    assert_eq!(dev.transactions(), 0);
}

#[test]
fn load_after_trigger_is_rejected() {
    let mut dev = SimulatedAccelerator::default();
    dev.load_weight(pack_word(1, 0, 0, 0), 0).unwrap();
    dev.load_input(pack_word(1, 0, 0, 0), 0).unwrap();
    dev.configure(fcaccel::accel::DeviceConfig { depth: 1, channels: 1, batch: 1 }, 0).unwrap();
    dev.trigger().unwrap();
    let err = dev.load_weight(0, 0).unwrap_err();
    assert_eq!(err, ChannelError::ProtocolViolation { opcode: Opcode::LoadWeight, state: ChannelState::Computing });
    assert_eq!(dev.read_result(0).unwrap(), 1);
}
