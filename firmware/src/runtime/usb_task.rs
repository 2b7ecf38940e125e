use embassy_futures::join::join;
use embassy_futures::select::{Either3, select3};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_usb::class::cdc_acm::{ControlChanged, Receiver, Sender};
use embassy_usb::driver::{Driver, EndpointError};

use super::{LINK_COUNTERS, LINK_RX, LINK_TX, LinkInput};
use crate::link::LinkFrame;
use crate::usb::{self, UsbDeviceStrings};

embassy_stm32::bind_interrupts!(struct UsbIrqs {
    USB_UCPD1_2 => embassy_stm32::usb::InterruptHandler<hal::peripherals::USB>;
});

#[embassy_executor::task]
pub async fn run(
    usb: Peri<'static, hal::peripherals::USB>,
    dp: Peri<'static, hal::peripherals::PA12>,
    dm: Peri<'static, hal::peripherals::PA11>,
    storage: &'static mut usb::UsbDeviceStorage,
) -> ! {
    let driver = embassy_stm32::usb::Driver::new(usb, UsbIrqs, dp, dm);
    let usb::UsbLink { mut device, link } =
        usb::UsbLink::new(driver, storage, UsbDeviceStrings::default());
    let usb::CdcAcmHandle {
        sender,
        receiver,
        control,
    } = link;

    join(device.run(), run_link_interface(sender, receiver, control)).await;
    loop {
        core::future::pending::<()>().await;
    }
}

async fn run_link_interface<D>(
    mut sender: Sender<'static, D>,
    mut receiver: Receiver<'static, D>,
    control: ControlChanged<'static>,
) -> !
where
    D: Driver<'static>,
{
    let mut ingress = [0u8; usb::MAX_PACKET_SIZE as usize];
    let mut pending_tx: Option<LinkFrame> = None;

    loop {
        join(receiver.wait_connection(), sender.wait_connection()).await;
        wait_for_dtr(&control, &sender).await;
        pending_tx.take();
        // Anything queued while detached is stale.
        LINK_TX.clear();

        defmt::info!("usb: link interface connected");
        LINK_COUNTERS.set_host_attached(true);
        LINK_RX.send(LinkInput::Connected).await;

        loop {
            match select3(
                receiver.read_packet(&mut ingress),
                async {
                    if pending_tx.is_none() {
                        pending_tx = Some(LINK_TX.receive().await);
                    }
                    if let Some(frame) = pending_tx.as_ref() {
                        sender.write_packet(frame).await?;
                    }
                    pending_tx = None;
                    Ok::<(), EndpointError>(())
                },
                control.control_changed(),
            )
            .await
            {
                Either3::First(Ok(0)) | Either3::Second(Ok(())) => {}
                Either3::First(Ok(count)) => {
                    let mut frame = LinkFrame::new();
                    if frame.extend_from_slice(&ingress[..count]).is_err() {
                        defmt::warn!("usb: dropping link frame len={} (overflow)", count);
                        continue;
                    }

                    LINK_RX.send(LinkInput::Data(frame)).await;
                }
                Either3::First(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: link interface disabled");
                    break;
                }
                Either3::First(Err(_)) => {
                    defmt::warn!("usb: link read error");
                }
                Either3::Second(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: link write disabled");
                    break;
                }
                Either3::Second(Err(_)) => {
                    defmt::warn!("usb: link write error");
                }
                Either3::Third(()) => {
                    if !sender.dtr() {
                        defmt::warn!("usb: host dropped DTR");
                        break;
                    }
                }
            }
        }

        LINK_COUNTERS.set_host_attached(false);
        LINK_RX.send(LinkInput::Disconnected).await;
    }
}

async fn wait_for_dtr<D>(control: &ControlChanged<'static>, sender: &Sender<'static, D>)
where
    D: Driver<'static>,
{
    while !sender.dtr() {
        control.control_changed().await;
    }
}
