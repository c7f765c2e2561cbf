pub mod chroot;
pub mod luks;
pub mod lvm;
pub mod mkfs;
pub mod mount;
pub mod parted;

// See linux/block/partition-generic.c
//
// char *disk_name(struct gendisk *hd, int partno, char *buf)
// {
// 	if (!partno)
// 		snprintf(buf, BDEVNAME_SIZE, "%s", hd->disk_name);
// 	else if (isdigit(hd->disk_name[strlen(hd->disk_name)-1]))
// 		snprintf(buf, BDEVNAME_SIZE, "%sp%d", hd->disk_name, partno);
// 	else
// 		snprintf(buf, BDEVNAME_SIZE, "%s%d", hd->disk_name, partno);
// 	return buf;
// }
//
pub(crate) fn partition_name(name: &str, part_number: usize) -> String {
    if name.ends_with(|c: char| c.is_ascii_digit()) {
        return format!("{name}p{part_number}");
    }

    format!("{name}{part_number}")
}
